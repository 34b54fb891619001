#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{PreloadKey, PreloadStatus, PreloadTask, SegmentKey};
use crate::prefetch::{NetworkQualitySource, horizon_for, preload_targets};
use crate::segment_cache::TieredSegmentCache;
use config::PrefetchConfig;
use dashmap::{DashMap, mapref::entry::Entry};
use flume::{Receiver, Sender, TrySendError};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Registry counts by status plus lifetime request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadStatistics {
    pub loading: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub submitted: u64,
    /// Requests ignored because the same key was already loading.
    pub suppressed: u64,
    /// Requests rejected because the worker queue was full.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
enum Outcome {
    Completed { fetched: usize },
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct Job {
    key: PreloadKey,
    run_id: u64,
    targets: Vec<SegmentKey>,
}

struct Shared {
    cache: Arc<TieredSegmentCache>,
    quality: Arc<dyn NetworkQualitySource>,
    config: PrefetchConfig,
    clock: Arc<dyn Clock>,
    tasks: DashMap<PreloadKey, PreloadTask>,
    next_run: AtomicU64,
    counters: Counters,
}

/// Warms the segment cache ahead of playback on a bounded pool of background
/// workers. Requesting a preload never waits for it.
pub struct AdaptivePrefetcher {
    shared: Arc<Shared>,
    queue: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl AdaptivePrefetcher {
    /// Spawn the worker pool on the current runtime.
    pub fn start(
        config: &PrefetchConfig,
        cache: Arc<TieredSegmentCache>,
        quality: Arc<dyn NetworkQualitySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(Shared {
            cache,
            quality,
            config: config.clone(),
            clock,
            tasks: DashMap::new(),
            next_run: AtomicU64::new(0),
            counters: Counters::default(),
        });
        let (queue, jobs) = flume::bounded(config.queue_capacity.max(1));
        let workers = (0..config.workers.max(1))
            .map(|worker| tokio::spawn(work(Arc::clone(&shared), jobs.clone(), worker)))
            .collect();
        info!(
            workers = config.workers.max(1),
            queue = config.queue_capacity.max(1),
            "prefetcher started"
        );

        Self {
            shared,
            queue,
            workers,
        }
    }

    /// Queue a warm-up of the segments following `offset_secs`, assuming the
    /// configured segment duration. Returns immediately. A request for a key
    /// that is already loading is a no-op.
    pub fn preload_next_segment(&self, stream_task_id: u64, offset_secs: u64) {
        self.submit(stream_task_id, offset_secs, self.shared.config.segment_duration);
    }

    /// Queue a warm-up of the segments following `segment`, sized like it.
    pub fn preload_after(&self, segment: &SegmentKey) {
        self.submit(
            segment.stream_task_id(),
            segment.start_secs(),
            Duration::from_secs(u64::from(segment.duration_secs())),
        );
    }

    fn submit(&self, stream_task_id: u64, offset_secs: u64, segment_duration: Duration) {
        let shared = &self.shared;
        let key = PreloadKey::new(stream_task_id, offset_secs);
        let quality = shared.quality.quality(stream_task_id);
        let horizon = horizon_for(&shared.config.horizons, quality);
        let targets = match preload_targets(stream_task_id, offset_secs, horizon, segment_duration) {
            Ok(targets) => targets,
            Err(err) => {
                warn!(%key, %err, "preload not planned");
                return;
            }
        };

        let run_id = shared.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let task = PreloadTask {
            run_id,
            stream_task_id,
            current_playback_offset: offset_secs,
            targets: targets.clone(),
            network_quality: quality,
            status: PreloadStatus::Loading,
            started_at: shared.clock.now(),
            ended_at: None,
            error_detail: None,
        };
        match shared.tasks.entry(key) {
            Entry::Occupied(entry) if entry.get().status == PreloadStatus::Loading => {
                shared.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "preload already in flight");
                return;
            }
            Entry::Occupied(mut entry) => {
                entry.insert(task);
            }
            Entry::Vacant(entry) => {
                entry.insert(task);
            }
        }
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        match self.queue.try_send(Job {
            key,
            run_id,
            targets,
        }) {
            Ok(()) => debug!(%key, ?quality, horizon_secs = horizon.as_secs(), "preload queued"),
            Err(err) => {
                let reason = rejection_reason(&err);
                shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                shared.finish(key, run_id, Outcome::Failed(reason.to_owned()));
                warn!(%key, reason, "preload dropped");
            }
        }
    }

    /// Mark a loading preload cancelled. Work already handed to a worker
    /// still runs, its outcome is discarded.
    pub fn cancel_preload(&self, stream_task_id: u64, offset_secs: u64) -> bool {
        let key = PreloadKey::new(stream_task_id, offset_secs);
        let cancelled = self.shared.transition(key, None, Outcome::Cancelled);
        if cancelled {
            debug!(%key, "preload cancelled");
        }
        cancelled
    }

    /// Drop terminal tasks that ended longer ago than the retention period.
    pub fn sweep(&self) -> usize {
        let now = self.shared.clock.now();
        let retention = self.shared.config.retention;
        let mut removed = 0;
        self.shared.tasks.retain(|_, task| {
            let expired = task.status.is_terminal()
                && task
                    .ended_at
                    .and_then(|ended| now.duration_since(ended).ok())
                    .is_some_and(|age| age >= retention);
            removed += usize::from(expired);
            !expired
        });
        if removed > 0 {
            debug!(removed, "finished preloads swept");
        }
        removed
    }

    pub fn task(&self, stream_task_id: u64, offset_secs: u64) -> Option<PreloadTask> {
        self.shared
            .tasks
            .get(&PreloadKey::new(stream_task_id, offset_secs))
            .map(|task| task.clone())
    }

    pub fn statistics(&self) -> PreloadStatistics {
        let counters = &self.shared.counters;
        let mut stats = PreloadStatistics {
            submitted: counters.submitted.load(Ordering::Relaxed),
            suppressed: counters.suppressed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            ..PreloadStatistics::default()
        };
        for task in self.shared.tasks.iter() {
            match task.status {
                PreloadStatus::Loading => stats.loading += 1,
                PreloadStatus::Completed => stats.completed += 1,
                PreloadStatus::Failed => stats.failed += 1,
                PreloadStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Stop accepting work and wait for the workers to drain the queue.
    pub async fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);
        for handle in workers {
            if let Err(err) = handle.await {
                warn!(%err, "preload worker join failed");
            }
        }
        info!("prefetcher stopped");
    }
}

impl Shared {
    fn finish(&self, key: PreloadKey, run_id: u64, outcome: Outcome) {
        let summary = format!("{outcome:?}");
        if self.transition(key, Some(run_id), outcome) {
            debug!(%key, outcome = %summary, "preload finished");
        } else {
            trace!(%key, run_id, "preload outcome discarded");
        }
    }

    /// Move a loading task to its terminal state. Only the run named by
    /// `run_id` is touched when one is given.
    fn transition(&self, key: PreloadKey, run_id: Option<u64>, outcome: Outcome) -> bool {
        let Some(mut task) = self.tasks.get_mut(&key) else {
            return false;
        };
        if task.status != PreloadStatus::Loading || run_id.is_some_and(|id| id != task.run_id) {
            return false;
        }
        task.ended_at = Some(self.clock.now());
        task.status = match outcome {
            Outcome::Completed { .. } => PreloadStatus::Completed,
            Outcome::Failed(detail) => {
                task.error_detail = Some(detail);
                PreloadStatus::Failed
            }
            Outcome::Cancelled => PreloadStatus::Cancelled,
        };
        true
    }

    /// Warm every target through the cache's shared loader. The first
    /// failure ends the run.
    async fn run(&self, job: &Job) -> Outcome {
        let mut fetched = 0;
        for target in &job.targets {
            match self.cache.warm(target).await {
                Ok(true) => fetched += 1,
                Ok(false) => trace!(key = %target, "already cached, skipping"),
                Err(err) => return Outcome::Failed(err.to_string()),
            }
        }
        Outcome::Completed { fetched }
    }
}

fn rejection_reason<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "preload queue full",
        TrySendError::Disconnected(_) => "preload workers stopped",
    }
}

async fn work(shared: Arc<Shared>, jobs: Receiver<Job>, worker: usize) {
    while let Ok(job) = jobs.recv_async().await {
        trace!(worker, key = %job.key, "preload started");
        let outcome = shared.run(&job).await;
        if let Outcome::Failed(err) = &outcome {
            warn!(key = %job.key, %err, "preload failed");
        }
        shared.finish(job.key, job.run_id, outcome);
    }
    trace!(worker, "preload worker exiting");
}
