#![forbid(unsafe_code)]
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use config::SegmentCacheConfig;
use dashmap::DashMap;
use edgecore::Error;
use edgecore::domain::SegmentKey;
use edgecore::segment_cache::SegmentBackend;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Origin held in memory that counts every fetch.
#[derive(Default)]
pub struct MemoryBackend {
    segments: DashMap<SegmentKey, Bytes>,
    fetches: DashMap<SegmentKey, usize>,
    total: AtomicUsize,
    delay: Duration,
}

impl MemoryBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn put(&self, key: SegmentKey, bytes: impl Into<Bytes>) {
        self.segments.insert(key, bytes.into());
    }

    pub fn fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn fetches_of(&self, key: &SegmentKey) -> usize {
        self.fetches.get(key).map_or(0, |count| *count)
    }
}

#[async_trait]
impl SegmentBackend for MemoryBackend {
    async fn fetch(&self, key: &SegmentKey) -> Result<Bytes, Error> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.fetches.entry(*key).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.segments
            .get(key)
            .map(|bytes| bytes.clone())
            .ok_or_else(|| Error::SegmentUnavailable {
                key: *key,
                reason: "not in archive".into(),
            })
    }
}

pub fn key(task: u64, start: u64) -> SegmentKey {
    SegmentKey::new(task, start, 10).unwrap()
}

/// Payload whose bytes identify the segment.
pub fn payload(key: &SegmentKey, len: usize) -> Bytes {
    let seed = key.to_string();
    seed.bytes().cycle().take(len).collect::<Vec<u8>>().into()
}

pub fn cache_config(l2_path: &Path) -> SegmentCacheConfig {
    SegmentCacheConfig {
        l1_max_mb: 16,
        l2_path: l2_path.to_path_buf(),
        backend_timeout: Duration::from_secs(2),
        ..SegmentCacheConfig::default()
    }
}
