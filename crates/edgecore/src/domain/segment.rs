#![forbid(unsafe_code)]

use super::SegmentKey;
use bytes::Bytes;
use std::time::SystemTime;

/// Segment bytes as held by one cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSegment {
    pub key: SegmentKey,
    pub bytes: Bytes,
    pub inserted_at: SystemTime,
}

impl CachedSegment {
    pub fn new(key: SegmentKey, bytes: Bytes, inserted_at: SystemTime) -> Self {
        Self {
            key,
            bytes,
            inserted_at,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}
