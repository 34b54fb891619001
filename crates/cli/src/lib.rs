#![forbid(unsafe_code)]

pub mod cli;
pub mod daemon;
pub mod error;
pub mod signals;
