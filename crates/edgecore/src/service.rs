#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{
    CachedInferenceResult, ContentHash, DeviceDescriptor, DeviceLoadStatus, DeviceScore,
    DeviceStatus, InferenceRequest, PreloadTask, SegmentKey,
};
use crate::error::Error;
use crate::inference::{
    InferenceCacheStatistics, InferenceDispatcher, InferenceExecutor, InferenceResponse,
    InferenceResultCache, SceneSource, WarmupReport,
};
use crate::prefetch::{AdaptivePrefetcher, NetworkQualitySource, PreloadStatistics};
use crate::segment_cache::{SegmentBackend, SegmentCacheStatistics, TieredSegmentCache};
use crate::selector::{DeviceLease, EdgeDeviceSelector, UtilizationStatistics};
use bytes::Bytes;
use config::Config;
use humansize::{DECIMAL, format_size};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Collaborators supplied by the host.
pub struct Services {
    pub backend: Arc<dyn SegmentBackend>,
    pub network_quality: Arc<dyn NetworkQualitySource>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreStatistics {
    pub segments: SegmentCacheStatistics,
    pub devices: UtilizationStatistics,
    pub preload: PreloadStatistics,
    pub inference: InferenceCacheStatistics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub segments_expired: usize,
    pub bytes_freed: u64,
    pub preloads_swept: usize,
}

/// Segment cache, device selector, prefetcher and inference cache wired
/// together.
pub struct EdgeCore {
    config: Config,
    segments: Arc<TieredSegmentCache>,
    selector: Arc<EdgeDeviceSelector>,
    prefetcher: AdaptivePrefetcher,
    inference_cache: Arc<InferenceResultCache>,
    dispatcher: InferenceDispatcher,
}

impl EdgeCore {
    /// Open the disk tier and spawn the preload workers.
    pub async fn start(config: Config, services: Services) -> Result<Self, Error> {
        config.validate()?;

        let segments = Arc::new(
            TieredSegmentCache::open(
                &config.segment_cache,
                services.backend,
                Arc::clone(&services.clock),
            )
            .await?,
        );
        let selector = Arc::new(EdgeDeviceSelector::new(
            config.selector.clone(),
            Arc::clone(&services.clock),
        ));
        let prefetcher = AdaptivePrefetcher::start(
            &config.prefetch,
            Arc::clone(&segments),
            services.network_quality,
            Arc::clone(&services.clock),
        );
        let inference_cache = Arc::new(InferenceResultCache::new(
            &config.inference,
            services.clock,
        ));
        let dispatcher = InferenceDispatcher::new(
            Arc::clone(&inference_cache),
            Arc::clone(&selector),
            config.inference.dispatch_deadline,
        );

        info!(
            l1 = %format_size(config.segment_cache.l1_max_bytes(), DECIMAL),
            l2 = %format_size(config.segment_cache.l2_max_bytes(), DECIMAL),
            l2_path = %config.segment_cache.l2_path.display(),
            "edge core started"
        );
        Ok(Self {
            config,
            segments,
            selector,
            prefetcher,
            inference_cache,
            dispatcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn segments(&self) -> &TieredSegmentCache {
        &self.segments
    }

    pub fn selector(&self) -> &EdgeDeviceSelector {
        &self.selector
    }

    pub fn prefetcher(&self) -> &AdaptivePrefetcher {
        &self.prefetcher
    }

    pub fn inference_cache(&self) -> &InferenceResultCache {
        &self.inference_cache
    }

    /// Serve a segment and schedule warm-up of the ones after it.
    pub async fn get_segment(&self, key: &SegmentKey) -> Result<Bytes, Error> {
        let bytes = self.segments.get_segment(key).await?;
        self.prefetcher.preload_after(key);
        Ok(bytes)
    }

    pub async fn write_to_cache(&self, key: SegmentKey, bytes: Bytes) {
        self.segments.write_to_cache(key, bytes).await;
    }

    pub async fn clear_task_cache(&self, stream_task_id: u64) {
        self.segments.clear_task_cache(stream_task_id).await;
    }

    pub async fn clear_all_cache(&self) {
        self.segments.clear_all_cache().await;
    }

    pub fn cache_statistics(&self) -> SegmentCacheStatistics {
        self.segments.statistics()
    }

    pub fn select_best_device(
        &self,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
    ) -> Option<DeviceDescriptor> {
        self.selector.select_best_device(request, candidates)
    }

    pub fn acquire_device(
        &self,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
    ) -> Option<DeviceLease> {
        self.selector.acquire(request, candidates)
    }

    pub fn release_device(&self, device_id: &str) -> bool {
        self.selector.release_device(device_id)
    }

    pub fn update_device_load(
        &self,
        device_id: &str,
        cpu_pct: f64,
        memory_pct: f64,
        gpu_pct: f64,
        latency_ms: u32,
    ) -> Result<(), Error> {
        self.selector
            .update_device_load(device_id, cpu_pct, memory_pct, gpu_pct, latency_ms)
    }

    pub fn update_device_status(&self, device_id: &str, status: DeviceStatus) {
        self.selector.update_device_status(device_id, status);
    }

    pub fn device_load(&self, device_id: &str) -> Option<DeviceLoadStatus> {
        self.selector.device_load(device_id)
    }

    pub fn score_devices<'a>(
        &self,
        candidates: &'a [DeviceDescriptor],
    ) -> Vec<(&'a DeviceDescriptor, DeviceScore)> {
        self.selector.score_devices(candidates)
    }

    pub fn utilization_statistics(&self) -> UtilizationStatistics {
        self.selector.utilization_statistics()
    }

    pub fn preload_next_segment(&self, stream_task_id: u64, offset_secs: u64) {
        self.prefetcher
            .preload_next_segment(stream_task_id, offset_secs);
    }

    pub fn cancel_preload(&self, stream_task_id: u64, offset_secs: u64) -> bool {
        self.prefetcher.cancel_preload(stream_task_id, offset_secs)
    }

    pub fn preload_task(&self, stream_task_id: u64, offset_secs: u64) -> Option<PreloadTask> {
        self.prefetcher.task(stream_task_id, offset_secs)
    }

    pub fn preload_statistics(&self) -> PreloadStatistics {
        self.prefetcher.statistics()
    }

    pub fn get_cached_result(&self, hash: &ContentHash) -> Option<CachedInferenceResult> {
        self.inference_cache.get_cached_result(hash)
    }

    pub fn cache_result(&self, hash: ContentHash, result: Bytes, result_type: impl Into<String>) {
        self.inference_cache.cache_result(hash, result, result_type);
    }

    pub async fn warmup_cache(
        &self,
        scene_ids: &[String],
        source: &dyn SceneSource,
    ) -> WarmupReport {
        self.inference_cache.warmup_cache(scene_ids, source).await
    }

    pub fn inference_statistics(&self) -> InferenceCacheStatistics {
        self.inference_cache.statistics()
    }

    pub async fn infer(
        &self,
        frame: &Bytes,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
        executor: &dyn InferenceExecutor,
    ) -> Result<InferenceResponse, Error> {
        self.dispatcher
            .infer(frame, request, candidates, executor)
            .await
    }

    pub fn statistics(&self) -> CoreStatistics {
        CoreStatistics {
            segments: self.segments.statistics(),
            devices: self.selector.utilization_statistics(),
            preload: self.prefetcher.statistics(),
            inference: self.inference_cache.statistics(),
        }
    }

    /// One full housekeeping pass.
    pub async fn maintain(&self) -> MaintenanceReport {
        let cleanup = self.segments.cleanup_expired().await;
        self.inference_cache.run_pending_tasks();
        MaintenanceReport {
            segments_expired: cleanup.removed,
            bytes_freed: cleanup.freed_bytes,
            preloads_swept: self.prefetcher.sweep(),
        }
    }

    /// Run scheduled disk cleanup and preload sweeps until `cancel` fires.
    pub async fn run_until(&self, cancel: CancellationToken) {
        let mut cleanup = schedule(self.config.segment_cache.l2_cleanup_interval);
        let mut sweep = schedule(self.config.prefetch.sweep_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                _ = cleanup.tick() => {
                    let report = self.segments.cleanup_expired().await;
                    self.inference_cache.run_pending_tasks();
                    debug!(removed = report.removed, "scheduled cleanup done");
                }
                _ = sweep.tick() => {
                    self.prefetcher.sweep();
                }
            }
        }
    }

    /// Stop the preload workers once queued work has drained.
    pub async fn shutdown(self) {
        self.prefetcher.shutdown().await;
        info!("edge core stopped");
    }
}

/// Interval whose first tick is one period away.
fn schedule(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
