#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{CachedSegment, SegmentKey};
use crate::error::Error;
use crate::segment_cache::{CleanupReport, DiskTier, MemoryTier, SegmentBackend};
use bytes::Bytes;
use config::SegmentCacheConfig;
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Read-only snapshot of the segment cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentCacheStatistics {
    pub l1_hits: u64,
    pub l2_hits: u64,
    /// Reads that had to go to the origin.
    pub misses: u64,
    /// Reads served by waiting on another caller's in-flight fetch.
    pub coalesced: u64,
    pub backend_failures: u64,
    pub write_failures: u64,
    pub l1_evictions: u64,
    pub hit_rate: f64,
    pub l1_entries: u64,
    pub l1_bytes: u64,
    pub l2_entries: u64,
    pub l2_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    backend_failures: AtomicU64,
    write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Disk,
    Origin,
}

/// Why a shared load produced no cacheable value.
#[derive(Debug)]
enum LoadError {
    Failed(Error),
    /// A clear ran while the load was in flight. The bytes go to the waiting
    /// readers but are not cached.
    Cleared(Bytes),
}

/// Memory tier in front of a disk tier in front of the segment origin.
pub struct TieredSegmentCache {
    l1: MemoryTier,
    l2: DiskTier,
    backend: Arc<dyn SegmentBackend>,
    backend_timeout: Duration,
    clock: Arc<dyn Clock>,
    counters: Counters,
    /// Bumped by every clear of one task.
    task_generations: DashMap<u64, u64>,
    /// Bumped by every full clear.
    epoch: AtomicU64,
}

impl TieredSegmentCache {
    pub async fn open(
        config: &SegmentCacheConfig,
        backend: Arc<dyn SegmentBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let l1 = MemoryTier::new(config.l1_max_bytes(), config.l1_idle_ttl);
        let l2 = DiskTier::open(
            config.l2_path.clone(),
            config.l2_max_bytes(),
            config.l2_ttl,
            Arc::clone(&clock),
        )
        .await?;
        Ok(Self {
            l1,
            l2,
            backend,
            backend_timeout: config.backend_timeout,
            clock,
            counters: Counters::default(),
            task_generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        })
    }

    /// Serve a segment from the fastest tier holding it, fetching it from the
    /// origin on a full miss. Concurrent misses for one key share one fetch.
    pub async fn get_segment(&self, key: &SegmentKey) -> Result<Bytes, Error> {
        if let Some(segment) = self.l1.get(key).await {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, tier = "l1", "segment hit");
            return Ok(segment.bytes);
        }
        self.load(key).await.map(|(bytes, _)| bytes)
    }

    /// Bring a segment into the cache through the same shared loader as
    /// [`TieredSegmentCache::get_segment`], so a read racing the warm-up
    /// waits for it instead of fetching again. Returns whether this call
    /// reached the origin.
    pub async fn warm(&self, key: &SegmentKey) -> Result<bool, Error> {
        if self.contains(key) {
            trace!(%key, "already cached, not warming");
            return Ok(false);
        }
        self.load(key)
            .await
            .map(|(_, resolved)| resolved == Some(Resolved::Origin))
    }

    /// Single-flight load through L2 and the origin into L1. A clear of the
    /// key's task during the load leaves both tiers untouched.
    async fn load(&self, key: &SegmentKey) -> Result<(Bytes, Option<Resolved>), Error> {
        let task = key.stream_task_id();
        let generation = self.generation(task);

        let mut resolved = None;
        let load = async {
            let (bytes, source) = match self.l2.get(key).await {
                Some(bytes) => (bytes, Resolved::Disk),
                None => match self.fetch_from_origin(key).await {
                    Ok(bytes) => (bytes, Resolved::Origin),
                    Err(err) => return Err(LoadError::Failed(err)),
                },
            };
            resolved = Some(source);
            if self.generation(task) != generation {
                return Err(LoadError::Cleared(bytes));
            }
            if source == Resolved::Origin {
                // disk first: the value must be durable before it is served
                self.write_l2(key, &bytes).await;
                if self.generation(task) != generation {
                    self.l2.remove(key).await;
                    return Err(LoadError::Cleared(bytes));
                }
            }
            Ok(CachedSegment::new(*key, bytes, self.clock.now()))
        };

        let bytes = match self.l1.get_or_load(*key, load).await {
            Ok(segment) => {
                if self.generation(task) != generation {
                    // cleared between the last check and the memory insert
                    self.l1.invalidate(key).await;
                    self.l2.remove(key).await;
                }
                segment.bytes
            }
            Err(shared) => match &*shared {
                LoadError::Cleared(bytes) => {
                    debug!(%key, "task cleared during load, value not cached");
                    bytes.clone()
                }
                LoadError::Failed(err) => return Err(Error::for_segment(*key, err)),
            },
        };

        match resolved {
            Some(Resolved::Disk) => {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, tier = "l2", "segment hit, promoted");
            }
            Some(Resolved::Origin) => {
                debug!(%key, size = bytes.len(), "segment fetched from origin");
            }
            None => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "segment served by in-flight fetch");
            }
        }
        Ok((bytes, resolved))
    }

    fn generation(&self, stream_task_id: u64) -> u64 {
        let task = self
            .task_generations
            .get(&stream_task_id)
            .map_or(0, |generation| *generation);
        self.epoch.load(Ordering::Acquire).wrapping_add(task)
    }

    /// Push a segment into both tiers without going through the read path.
    pub async fn write_to_cache(&self, key: SegmentKey, bytes: Bytes) {
        self.write_l2(&key, &bytes).await;
        self.l1
            .insert(CachedSegment::new(key, bytes, self.clock.now()))
            .await;
    }

    /// Whether any tier currently holds `key`.
    pub fn contains(&self, key: &SegmentKey) -> bool {
        self.l1.contains(key) || self.l2.contains(key)
    }

    pub async fn clear_task_cache(&self, stream_task_id: u64) {
        *self.task_generations.entry(stream_task_id).or_default() += 1;
        // disk first so a concurrent read cannot promote a stale copy back
        let l2 = self.l2.remove_task(stream_task_id).await;
        let l1 = self.l1.invalidate_task(stream_task_id).await;
        debug!(stream_task_id, l1, l2, "task segments cleared");
    }

    pub async fn clear_all_cache(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.l2.clear().await;
        self.l1.invalidate_all();
        self.l1.run_pending_tasks().await;
        debug!("all segments cleared");
    }

    /// Scheduled housekeeping: expire disk entries and settle the memory tier.
    pub async fn cleanup_expired(&self) -> CleanupReport {
        self.l1.run_pending_tasks().await;
        self.l2.cleanup_expired().await
    }

    pub fn statistics(&self) -> SegmentCacheStatistics {
        let l1_hits = self.counters.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.counters.l2_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let coalesced = self.counters.coalesced.load(Ordering::Relaxed);
        let requests = l1_hits + l2_hits + misses + coalesced;
        let hit_rate = if requests == 0 {
            0.0
        } else {
            (requests - misses) as f64 / requests as f64
        };

        SegmentCacheStatistics {
            l1_hits,
            l2_hits,
            misses,
            coalesced,
            backend_failures: self.counters.backend_failures.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            l1_evictions: self.l1.evictions(),
            hit_rate,
            l1_entries: self.l1.entry_count(),
            l1_bytes: self.l1.weighted_size(),
            l2_entries: self.l2.entry_count() as u64,
            l2_bytes: self.l2.total_bytes(),
        }
    }

    async fn fetch_from_origin(&self, key: &SegmentKey) -> Result<Bytes, Error> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(self.backend_timeout, self.backend.fetch(key)).await;
        let err = match result {
            Ok(Ok(bytes)) => return Ok(bytes),
            Ok(Err(err)) => Error::for_segment(*key, &err),
            Err(_) => Error::BackendTimeout {
                key: *key,
                timeout: self.backend_timeout,
            },
        };
        self.counters.backend_failures.fetch_add(1, Ordering::Relaxed);
        warn!(%key, %err, "origin fetch failed");
        Err(err)
    }

    async fn write_l2(&self, key: &SegmentKey, bytes: &Bytes) {
        if let Err(err) = self.l2.put(key, bytes).await {
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(%key, %err, "disk tier write failed, serving from memory");
        }
    }
}
