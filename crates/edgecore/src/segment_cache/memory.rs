#![forbid(unsafe_code)]

use crate::domain::{CachedSegment, SegmentKey};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use std::future::Future;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tracing::trace;

/// Hot tier: byte-weighted LRU with an idle TTL.
pub struct MemoryTier {
    cache: Cache<SegmentKey, CachedSegment>,
    evictions: Arc<AtomicU64>,
}

impl MemoryTier {
    pub fn new(max_bytes: u64, idle_ttl: Duration) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&evictions);
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key, segment: &CachedSegment| {
                u32::try_from(segment.size_bytes()).unwrap_or(u32::MAX)
            })
            .time_to_idle(idle_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key, _segment, cause: RemovalCause| {
                if cause.was_evicted() {
                    counter.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, ?cause, "memory tier eviction");
                }
            })
            .build();
        Self { cache, evictions }
    }

    pub async fn get(&self, key: &SegmentKey) -> Option<CachedSegment> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, segment: CachedSegment) {
        self.cache.insert(segment.key, segment).await;
    }

    /// Resolve `key`, running `load` at most once across concurrent callers
    /// of the same missing key. The others wait for that result. Nothing is
    /// stored when `load` fails.
    pub async fn get_or_load<F, E>(&self, key: SegmentKey, load: F) -> Result<CachedSegment, Arc<E>>
    where
        F: Future<Output = Result<CachedSegment, E>>,
        E: Send + Sync + 'static,
    {
        self.cache.try_get_with(key, load).await
    }

    pub async fn invalidate(&self, key: &SegmentKey) {
        self.cache.invalidate(key).await;
    }

    pub fn contains(&self, key: &SegmentKey) -> bool {
        self.cache.contains_key(key)
    }

    pub async fn invalidate_task(&self, stream_task_id: u64) -> usize {
        let keys: Vec<SegmentKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.stream_task_id() == stream_task_id)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.cache.invalidate(key).await;
        }
        keys.len()
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
