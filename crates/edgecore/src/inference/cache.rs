#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{CachedInferenceResult, ContentHash};
use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use config::InferenceConfig;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info, trace, warn};

/// A known scene with its precomputed result.
#[derive(Debug, Clone)]
pub struct SceneSample {
    pub frame: Bytes,
    pub result: Bytes,
    pub result_type: String,
}

/// Supplies samples for cache warm-up.
#[async_trait]
pub trait SceneSource: Send + Sync {
    async fn load(&self, scene_id: &str) -> Result<SceneSample, Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub warmed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceCacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries pushed out by the capacity bound.
    pub evictions: u64,
    pub expirations: u64,
    pub size: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Content-addressed store of inference results: entry-bounded LRU with a
/// fixed time to live.
pub struct InferenceResultCache {
    cache: Cache<ContentHash, CachedInferenceResult>,
    counters: Arc<Counters>,
    clock: Arc<dyn Clock>,
}

impl InferenceResultCache {
    pub fn new(config: &InferenceConfig, clock: Arc<dyn Clock>) -> Self {
        let counters = Arc::new(Counters::default());
        let listener = Arc::clone(&counters);
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |hash, _result, cause| match cause {
                RemovalCause::Size => {
                    listener.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(%hash, "inference result evicted");
                }
                RemovalCause::Expired => {
                    listener.expirations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            })
            .build();
        Self {
            cache,
            counters,
            clock,
        }
    }

    pub fn get_cached_result(&self, hash: &ContentHash) -> Option<CachedInferenceResult> {
        self.record(hash, self.cache.get(hash))
    }

    /// Like [`InferenceResultCache::get_cached_result`], but an entry of
    /// another result type is a miss.
    pub fn get_cached_result_of(
        &self,
        hash: &ContentHash,
        result_type: &str,
    ) -> Option<CachedInferenceResult> {
        let found = self
            .cache
            .get(hash)
            .filter(|cached| cached.result_type == result_type);
        self.record(hash, found)
    }

    fn record(
        &self,
        hash: &ContentHash,
        found: Option<CachedInferenceResult>,
    ) -> Option<CachedInferenceResult> {
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!(%hash, hit = found.is_some(), "inference cache lookup");
        found
    }

    /// Store a result. A later write for the same hash replaces it.
    pub fn cache_result(&self, hash: ContentHash, result: Bytes, result_type: impl Into<String>) {
        let entry = CachedInferenceResult {
            content_hash: hash,
            result,
            result_type: result_type.into(),
            cached_at: self.clock.now(),
        };
        self.cache.insert(hash, entry);
    }

    /// Best-effort pre-population. A scene that cannot be loaded is counted
    /// and skipped.
    pub async fn warmup_cache(
        &self,
        scene_ids: &[String],
        source: &dyn SceneSource,
    ) -> WarmupReport {
        let mut report = WarmupReport::default();
        for scene_id in scene_ids {
            match source.load(scene_id).await {
                Ok(sample) => {
                    let hash = ContentHash::of(&sample.frame);
                    self.cache_result(hash, sample.result, sample.result_type);
                    report.warmed += 1;
                }
                Err(err) => {
                    warn!(scene_id, %err, "scene warm-up failed");
                    report.failed += 1;
                }
            }
        }
        info!(warmed = report.warmed, failed = report.failed, "inference cache warmed");
        report
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        debug!("inference cache cleared");
    }

    /// Apply pending evictions so counters and size are current.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn statistics(&self) -> InferenceCacheStatistics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        InferenceCacheStatistics {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;

    fn cache(max_entries: u64) -> InferenceResultCache {
        let config = InferenceConfig {
            max_entries,
            ..InferenceConfig::default()
        };
        InferenceResultCache::new(&config, Arc::new(ManualClock::default()))
    }

    #[test]
    fn miss_then_hit() {
        let cache = cache(16);
        let hash = ContentHash::of(b"frame");
        assert!(cache.get_cached_result(&hash).is_none());

        cache.cache_result(hash, Bytes::from_static(b"2 faces"), "face_detection");
        let found = cache.get_cached_result(&hash).unwrap();
        assert_eq!(found.result, Bytes::from_static(b"2 faces"));
        assert_eq!(found.result_type, "face_detection");
        assert_eq!(found.content_hash, hash);

        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn other_result_type_is_a_miss() {
        let cache = cache(16);
        let hash = ContentHash::of(b"frame");
        cache.cache_result(hash, Bytes::from_static(b"3 cars"), "object_detection");

        assert!(cache.get_cached_result_of(&hash, "face_detection").is_none());
        assert!(cache.get_cached_result_of(&hash, "object_detection").is_some());

        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn capacity_overflow_is_counted_as_eviction() {
        let cache = cache(2);
        for n in 0u8..8 {
            cache.cache_result(ContentHash::of(&[n]), Bytes::from(vec![n]), "t");
            cache.run_pending_tasks();
        }
        let stats = cache.statistics();
        assert!(stats.size <= 2, "size {}", stats.size);
        assert!(stats.evictions >= 6, "evictions {}", stats.evictions);
    }

    #[test]
    fn invalidate_all_empties_without_counting_evictions() {
        let cache = cache(16);
        cache.cache_result(ContentHash::of(b"a"), Bytes::new(), "t");
        cache.invalidate_all();
        cache.run_pending_tasks();
        assert!(cache.get_cached_result(&ContentHash::of(b"a")).is_none());
        assert_eq!(cache.statistics().evictions, 0);
    }
}
