#![forbid(unsafe_code)]

pub mod clock;
pub mod domain;
mod error;
pub mod inference;
pub mod prefetch;
pub mod segment_cache;
pub mod selector;
mod service;

pub use error::Error;
pub use service::{CoreStatistics, EdgeCore, MaintenanceReport, Services};
