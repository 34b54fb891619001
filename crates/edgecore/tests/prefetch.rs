#![forbid(unsafe_code)]

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{MemoryBackend, cache_config, key, payload};
use config::PrefetchConfig;
use edgecore::Error;
use edgecore::clock::{Clock, ManualClock};
use edgecore::domain::{NetworkQuality, PreloadStatus, PreloadTask, SegmentKey};
use edgecore::prefetch::{AdaptivePrefetcher, SharedNetworkQuality};
use edgecore::segment_cache::{SegmentBackend, TieredSegmentCache};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::Notify;

struct Harness {
    _dir: TempDir,
    cache: Arc<TieredSegmentCache>,
    quality: Arc<SharedNetworkQuality>,
    clock: Arc<ManualClock>,
    prefetcher: AdaptivePrefetcher,
}

async fn harness(backend: Arc<dyn SegmentBackend>, config: PrefetchConfig) -> Harness {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(
        TieredSegmentCache::open(&cache_config(dir.path()), backend, clock.clone())
            .await
            .unwrap(),
    );
    let quality = Arc::new(SharedNetworkQuality::new(NetworkQuality::Medium));
    let prefetcher =
        AdaptivePrefetcher::start(&config, cache.clone(), quality.clone(), clock.clone());
    Harness {
        _dir: dir,
        cache,
        quality,
        clock,
        prefetcher,
    }
}

fn stocked(task: u64, starts: impl IntoIterator<Item = u64>) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::default());
    for start in starts {
        let segment = key(task, start);
        backend.put(segment, payload(&segment, 256));
    }
    backend
}

async fn settle(prefetcher: &AdaptivePrefetcher, task: u64, offset: u64) -> PreloadTask {
    for _ in 0..500 {
        if let Some(found) = prefetcher.task(task, offset)
            && found.status.is_terminal()
        {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("preload {task}_{offset} never finished");
}

#[tokio::test]
async fn preload_warms_following_segments() {
    let backend = stocked(1, [10, 20, 30]);
    let h = harness(backend.clone(), PrefetchConfig::default()).await;

    h.prefetcher.preload_next_segment(1, 0);
    let task = settle(&h.prefetcher, 1, 0).await;

    assert_eq!(task.status, PreloadStatus::Completed);
    assert_eq!(task.network_quality, NetworkQuality::Medium);
    assert_eq!(task.target_key(), Some(key(1, 10)));
    assert_eq!(task.targets, vec![key(1, 10), key(1, 20), key(1, 30)]);
    assert!(task.ended_at.is_some());
    for start in [10, 20, 30] {
        assert!(h.cache.contains(&key(1, start)));
    }
    assert_eq!(backend.fetches(), 3);

    // preloaded data is served without another origin call
    assert_eq!(h.cache.get_segment(&key(1, 20)).await.unwrap(), payload(&key(1, 20), 256));
    assert_eq!(backend.fetches(), 3);
}

#[tokio::test]
async fn resident_segments_are_not_fetched_again() {
    let backend = stocked(1, [10, 20, 30]);
    let h = harness(backend.clone(), PrefetchConfig::default()).await;
    h.cache.write_to_cache(key(1, 10), payload(&key(1, 10), 256)).await;
    h.cache.write_to_cache(key(1, 20), payload(&key(1, 20), 256)).await;

    h.prefetcher.preload_next_segment(1, 0);
    assert_eq!(settle(&h.prefetcher, 1, 0).await.status, PreloadStatus::Completed);
    assert_eq!(backend.fetches(), 1);
    assert_eq!(backend.fetches_of(&key(1, 30)), 1);
}

#[tokio::test]
async fn duplicate_requests_are_suppressed() {
    let backend = Arc::new(MemoryBackend::with_delay(Duration::from_millis(100)));
    let segment = key(4, 10);
    backend.put(segment, payload(&segment, 64));
    let h = harness(backend.clone(), PrefetchConfig::default()).await;
    h.quality.set(NetworkQuality::Poor);

    h.prefetcher.preload_next_segment(4, 0);
    h.prefetcher.preload_next_segment(4, 0);
    h.prefetcher.preload_next_segment(4, 0);

    let stats = h.prefetcher.statistics();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.suppressed, 2);
    assert_eq!(stats.loading, 1);

    settle(&h.prefetcher, 4, 0).await;
    assert_eq!(backend.fetches(), 1);

    // once finished, the same key may run again
    h.prefetcher.preload_next_segment(4, 0);
    assert_eq!(h.prefetcher.statistics().submitted, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_requests_register_one_preload() {
    let backend = Arc::new(MemoryBackend::with_delay(Duration::from_millis(100)));
    let segment = key(5, 10);
    backend.put(segment, payload(&segment, 64));
    let h = harness(backend.clone(), PrefetchConfig::default()).await;
    h.quality.set(NetworkQuality::Poor);

    let start = Barrier::new(8);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                start.wait();
                h.prefetcher.preload_next_segment(5, 0);
            });
        }
    });

    let stats = h.prefetcher.statistics();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.suppressed, 7);
    assert_eq!(stats.loading + stats.completed + stats.failed + stats.cancelled, 1);

    assert_eq!(settle(&h.prefetcher, 5, 0).await.status, PreloadStatus::Completed);
    assert_eq!(backend.fetches_of(&segment), 1);
}

#[tokio::test]
async fn playback_read_joins_a_running_preload() {
    let backend = Arc::new(MemoryBackend::with_delay(Duration::from_millis(200)));
    let segment = key(1, 10);
    backend.put(segment, payload(&segment, 128));
    let h = harness(backend.clone(), PrefetchConfig::default()).await;
    h.quality.set(NetworkQuality::Poor);

    h.prefetcher.preload_next_segment(1, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.cache.get_segment(&segment).await.unwrap(), payload(&segment, 128));

    assert_eq!(settle(&h.prefetcher, 1, 0).await.status, PreloadStatus::Completed);
    assert_eq!(backend.fetches_of(&segment), 1);
    let stats = h.cache.statistics();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 1);
}

#[tokio::test]
async fn origin_failure_is_recorded_on_the_task() {
    let h = harness(Arc::new(MemoryBackend::default()), PrefetchConfig::default()).await;
    h.quality.set(NetworkQuality::Narrow);

    h.prefetcher.preload_next_segment(6, 95);
    let task = settle(&h.prefetcher, 6, 95).await;

    assert_eq!(task.status, PreloadStatus::Failed);
    assert_eq!(task.targets, vec![key(6, 100)]);
    assert!(task.error_detail.unwrap().contains("6_100_10"));
    assert_eq!(h.prefetcher.statistics().failed, 1);
    assert_eq!(h.cache.statistics().backend_failures, 1);
}

#[tokio::test]
async fn cancelled_work_still_runs_but_stays_cancelled() {
    let backend = Arc::new(MemoryBackend::with_delay(Duration::from_millis(100)));
    let segment = key(2, 10);
    backend.put(segment, payload(&segment, 64));
    let h = harness(backend.clone(), PrefetchConfig::default()).await;
    h.quality.set(NetworkQuality::Poor);

    h.prefetcher.preload_next_segment(2, 0);
    assert!(h.prefetcher.cancel_preload(2, 0));
    assert!(!h.prefetcher.cancel_preload(2, 0));
    assert!(!h.prefetcher.cancel_preload(2, 999));

    for _ in 0..500 {
        if h.cache.contains(&segment) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.cache.contains(&segment));
    let task = h.prefetcher.task(2, 0).unwrap();
    assert_eq!(task.status, PreloadStatus::Cancelled);
    assert_eq!(h.prefetcher.statistics().cancelled, 1);
}

#[tokio::test]
async fn sweep_removes_old_terminal_tasks_only() {
    let backend = stocked(3, [10]);
    let config = PrefetchConfig {
        retention: Duration::from_secs(600),
        ..PrefetchConfig::default()
    };
    let h = harness(backend, config).await;
    h.quality.set(NetworkQuality::Poor);

    h.prefetcher.preload_next_segment(3, 0);
    settle(&h.prefetcher, 3, 0).await;
    assert_eq!(h.prefetcher.sweep(), 0);

    h.clock.advance(Duration::from_secs(601));
    assert_eq!(h.prefetcher.sweep(), 1);
    assert!(h.prefetcher.task(3, 0).is_none());
    assert_eq!(h.prefetcher.statistics().completed, 0);
}

#[tokio::test]
async fn horizon_follows_current_network_quality() {
    let h = harness(Arc::new(MemoryBackend::default()), PrefetchConfig::default()).await;

    h.quality.set(NetworkQuality::Wide);
    h.prefetcher.preload_next_segment(9, 0);
    h.quality.set(NetworkQuality::Poor);
    h.prefetcher.preload_next_segment(9, 100);

    let wide = settle(&h.prefetcher, 9, 0).await;
    let poor = settle(&h.prefetcher, 9, 100).await;
    assert_eq!(wide.targets.len(), 6);
    assert_eq!(wide.network_quality, NetworkQuality::Wide);
    assert_eq!(poor.targets, vec![key(9, 110)]);
    assert_eq!(poor.started_at, h.clock.now());
}

/// Origin that blocks every fetch until released.
#[derive(Default)]
struct GatedBackend {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl SegmentBackend for GatedBackend {
    async fn fetch(&self, _key: &SegmentKey) -> Result<Bytes, Error> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Bytes::from_static(b"segment"))
    }
}

#[tokio::test]
async fn full_queue_drops_with_failed_task() {
    let backend = Arc::new(GatedBackend::default());
    let config = PrefetchConfig {
        workers: 1,
        queue_capacity: 1,
        ..PrefetchConfig::default()
    };
    let h = harness(backend.clone(), config).await;
    h.quality.set(NetworkQuality::Poor);

    h.prefetcher.preload_next_segment(1, 0);
    backend.started.notified().await;
    h.prefetcher.preload_next_segment(1, 10);
    h.prefetcher.preload_next_segment(1, 20);

    let stats = h.prefetcher.statistics();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.loading, 2);
    let dropped = h.prefetcher.task(1, 20).unwrap();
    assert_eq!(dropped.status, PreloadStatus::Failed);
    assert_eq!(dropped.error_detail.as_deref(), Some("preload queue full"));

    backend.release.notify_one();
    assert_eq!(settle(&h.prefetcher, 1, 0).await.status, PreloadStatus::Completed);
}
