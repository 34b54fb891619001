#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{path::PathBuf, time::Duration};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentCacheConfig {
    /// Memory tier bound in megabytes, weighted by segment byte size.
    pub l1_max_mb: u64,

    /// Inactivity after which a memory tier entry expires.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub l1_idle_ttl: Duration,

    /// Disk tier bound in gigabytes.
    pub l2_max_gb: u64,

    /// Root directory of the disk tier.
    pub l2_path: PathBuf,

    /// Wall-clock lifetime of a disk tier entry, counted from its last write.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub l2_ttl: Duration,

    /// Interval of the scheduled disk tier cleanup pass.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub l2_cleanup_interval: Duration,

    /// Upper bound on a single origin fetch.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub backend_timeout: Duration,
}

impl Default for SegmentCacheConfig {
    fn default() -> Self {
        Self {
            l1_max_mb: 512,
            l1_idle_ttl: Duration::from_secs(30 * 60),
            l2_max_gb: 10,
            l2_path: PathBuf::from("/var/cache/edged/segments"),
            l2_ttl: Duration::from_secs(24 * 60 * 60),
            l2_cleanup_interval: Duration::from_secs(60 * 60),
            backend_timeout: Duration::from_secs(10),
        }
    }
}

impl SegmentCacheConfig {
    pub fn l1_max_bytes(&self) -> u64 {
        self.l1_max_mb.saturating_mul(MIB)
    }

    pub fn l2_max_bytes(&self) -> u64 {
        self.l2_max_gb.saturating_mul(GIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_bounds_follow_units() {
        let config = SegmentCacheConfig {
            l1_max_mb: 2,
            l2_max_gb: 3,
            ..Default::default()
        };
        assert_eq!(config.l1_max_bytes(), 2 * 1024 * 1024);
        assert_eq!(config.l2_max_bytes(), 3 * 1024 * 1024 * 1024);
    }

    #[test]
    fn byte_bounds_saturate() {
        let config = SegmentCacheConfig {
            l1_max_mb: u64::MAX,
            l2_max_gb: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.l1_max_bytes(), u64::MAX);
        assert_eq!(config.l2_max_bytes(), u64::MAX);
    }
}
