#![forbid(unsafe_code)]

mod device_selector;
mod lease;
mod registry;
mod scoring;

pub use device_selector::{EdgeDeviceSelector, UtilizationStatistics};
pub use lease::DeviceLease;
pub use scoring::score;
