#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of background preload workers.
    pub workers: usize,

    /// Pending preload requests held while every worker is busy. Requests
    /// beyond this are dropped.
    pub queue_capacity: usize,

    /// Duration of one stored segment.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub segment_duration: Duration,

    pub horizons: PreloadHorizons,

    /// Interval of the terminal-task sweep.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub sweep_interval: Duration,

    /// How long a finished task stays visible before the sweep removes it.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub retention: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 64,
            segment_duration: Duration::from_secs(10),
            horizons: PreloadHorizons::default(),
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(10 * 60),
        }
    }
}

/// Seconds of video preloaded ahead of playback, per network class.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreloadHorizons {
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub wide: Duration,
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub medium: Duration,
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub narrow: Duration,
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub poor: Duration,
}

impl Default for PreloadHorizons {
    fn default() -> Self {
        Self {
            wide: Duration::from_secs(60),
            medium: Duration::from_secs(30),
            narrow: Duration::from_secs(10),
            poor: Duration::from_secs(5),
        }
    }
}
