#![forbid(unsafe_code)]

mod plan;
mod prefetcher;
mod quality;

pub use plan::{horizon_for, preload_targets};
pub use prefetcher::{AdaptivePrefetcher, PreloadStatistics};
pub use quality::{NetworkQualitySource, SharedNetworkQuality};
