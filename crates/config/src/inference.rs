#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Maximum number of cached inference results.
    pub max_entries: u64,

    /// Lifetime of a cached result.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub ttl: Duration,

    /// Deadline for one dispatched inference, after which the device slot
    /// is released.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub dispatch_deadline: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(60 * 60),
            dispatch_deadline: Duration::from_secs(30),
        }
    }
}
