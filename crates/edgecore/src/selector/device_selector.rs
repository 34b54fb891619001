#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{
    DeviceDescriptor, DeviceLoadStatus, DeviceScore, DeviceStatus, InferenceRequest,
};
use crate::error::Error;
use crate::selector::registry::{DeviceLoad, DeviceRegistry};
use crate::selector::{DeviceLease, score};
use config::SelectorConfig;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::{debug, trace};

/// Optimistic claims retried before a selection takes its slot
/// unconditionally.
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationStatistics {
    pub device_count: usize,
    pub online: usize,
    pub busy: usize,
    pub offline: usize,
    pub avg_cpu_pct: f64,
    pub avg_memory_pct: f64,
    pub avg_gpu_pct: f64,
    pub avg_latency_ms: f64,
    pub active_tasks: u64,
    pub lifetime_tasks: u64,
    /// Selections that lost a race for their first choice and re-scored.
    pub contended_selections: u64,
}

struct Candidate<'a> {
    device: &'a DeviceDescriptor,
    load: Arc<DeviceLoad>,
    snapshot: DeviceLoadStatus,
}

/// Places inference work on the least loaded edge device.
pub struct EdgeDeviceSelector {
    bands: SelectorConfig,
    registry: DeviceRegistry,
    clock: Arc<dyn Clock>,
    contended: AtomicU64,
}

impl EdgeDeviceSelector {
    pub fn new(bands: SelectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            bands,
            registry: DeviceRegistry::default(),
            clock,
            contended: AtomicU64::new(0),
        }
    }

    /// Pick the best online candidate and count one more task against it.
    /// The caller owes a [`EdgeDeviceSelector::release_device`] once the task
    /// ends.
    pub fn select_best_device(
        &self,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
    ) -> Option<DeviceDescriptor> {
        self.claim(request, candidates).map(|(device, _)| device)
    }

    /// Like [`EdgeDeviceSelector::select_best_device`], with the release
    /// tied to the returned lease.
    pub fn acquire(
        &self,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
    ) -> Option<DeviceLease> {
        self.claim(request, candidates)
            .map(|(device, load)| DeviceLease::new(device, load))
    }

    /// Paired decrement for a selection. Returns `false`, with a warning, if
    /// the device had no task outstanding.
    pub fn release_device(&self, device_id: &str) -> bool {
        self.registry.release(device_id)
    }

    pub fn update_device_load(
        &self,
        device_id: &str,
        cpu_pct: f64,
        memory_pct: f64,
        gpu_pct: f64,
        latency_ms: u32,
    ) -> Result<(), Error> {
        if device_id.is_empty() {
            return Err(Error::InvalidInput("empty device id".into()));
        }
        for (name, value) in [("cpu", cpu_pct), ("memory", memory_pct), ("gpu", gpu_pct)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{name} usage {value} of device {device_id} is not a percentage"
                )));
            }
        }

        self.registry.entry(device_id).record(
            cpu_pct,
            memory_pct,
            gpu_pct,
            latency_ms,
            self.clock.now(),
        );
        trace!(device_id, cpu_pct, memory_pct, gpu_pct, latency_ms, "device telemetry");
        Ok(())
    }

    pub fn update_device_status(&self, device_id: &str, status: DeviceStatus) {
        self.registry.entry(device_id).set_status(status);
        debug!(device_id, ?status, "device status changed");
    }

    pub fn device_load(&self, device_id: &str) -> Option<DeviceLoadStatus> {
        self.registry
            .get(device_id)
            .map(|load| load.snapshot(device_id))
    }

    /// Current score of each candidate, without side effects.
    pub fn score_devices<'a>(
        &self,
        candidates: &'a [DeviceDescriptor],
    ) -> Vec<(&'a DeviceDescriptor, DeviceScore)> {
        candidates
            .iter()
            .map(|device| {
                let snapshot = self
                    .device_load(&device.device_id)
                    .unwrap_or_else(|| DeviceLoadStatus::idle(&device.device_id));
                (device, score(&self.bands, &snapshot))
            })
            .collect()
    }

    pub fn utilization_statistics(&self) -> UtilizationStatistics {
        let snapshots = self.registry.snapshots();
        let count = snapshots.len();
        let mean = |metric: fn(&DeviceLoadStatus) -> f64| {
            if count == 0 {
                0.0
            } else {
                snapshots.iter().map(metric).sum::<f64>() / count as f64
            }
        };
        let with_status =
            |status: DeviceStatus| snapshots.iter().filter(|s| s.status == status).count();

        UtilizationStatistics {
            device_count: count,
            online: with_status(DeviceStatus::Online),
            busy: with_status(DeviceStatus::Busy),
            offline: with_status(DeviceStatus::Offline),
            avg_cpu_pct: mean(|s| s.cpu_usage_pct),
            avg_memory_pct: mean(|s| s.memory_usage_pct),
            avg_gpu_pct: mean(|s| s.gpu_usage_pct),
            avg_latency_ms: mean(|s| f64::from(s.network_latency_ms)),
            active_tasks: snapshots
                .iter()
                .map(|s| u64::from(s.current_task_count))
                .sum(),
            lifetime_tasks: snapshots.iter().map(|s| s.total_task_count).sum(),
            contended_selections: self.contended.load(Ordering::Relaxed),
        }
    }

    /// Score, choose and take a slot in one step. The slot is only taken if
    /// the queue depth that was scored is still current, so two concurrent
    /// selections never both act on the same depth.
    fn claim(
        &self,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
    ) -> Option<(DeviceDescriptor, Arc<DeviceLoad>)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let live: Vec<Candidate<'_>> = candidates
                .iter()
                .filter_map(|device| {
                    let load = self.registry.entry(&device.device_id);
                    let snapshot = load.snapshot(&device.device_id);
                    (snapshot.status != DeviceStatus::Offline).then_some(Candidate {
                        device,
                        load,
                        snapshot,
                    })
                })
                .collect();

            let chosen = match live.len() {
                0 => {
                    debug!(
                        result_type = %request.result_type,
                        candidates = candidates.len(),
                        "no online candidate device"
                    );
                    return None;
                }
                1 => &live[0],
                _ => &live[self.best_index(&live)],
            };

            let claimed = if attempt >= MAX_CLAIM_ATTEMPTS {
                chosen.load.claim();
                true
            } else {
                chosen.load.try_claim(chosen.snapshot.current_task_count)
            };

            if claimed {
                debug!(
                    result_type = %request.result_type,
                    device_id = %chosen.device.device_id,
                    queue_depth = chosen.snapshot.current_task_count + 1,
                    "device selected"
                );
                return Some((chosen.device.clone(), Arc::clone(&chosen.load)));
            }
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Highest total wins, then the shorter queue, then the earlier candidate.
    fn best_index(&self, live: &[Candidate<'_>]) -> usize {
        let mut best: Option<(usize, u32, u32)> = None;
        for (index, candidate) in live.iter().enumerate() {
            let total = score(&self.bands, &candidate.snapshot).total;
            let tasks = candidate.snapshot.current_task_count;
            let better = match best {
                None => true,
                Some((_, best_total, best_tasks)) => {
                    total > best_total || (total == best_total && tasks < best_tasks)
                }
            };
            if better {
                best = Some((index, total, tasks));
            }
            trace!(device_id = %candidate.device.device_id, total, tasks, "device scored");
        }
        best.map_or(0, |(index, _, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::HardwareClass;

    fn selector() -> EdgeDeviceSelector {
        EdgeDeviceSelector::new(SelectorConfig::default(), Arc::new(ManualClock::default()))
    }

    fn device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(id, format!("camera {id}"), HardwareClass::DiscreteGpu)
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new("face_detection")
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert_eq!(selector().select_best_device(&request(), &[]), None);
    }

    #[test]
    fn single_candidate_is_taken_and_counted() {
        let selector = selector();
        selector.update_device_load("a", 99.0, 99.0, 99.0, 900).unwrap();
        let chosen = selector.select_best_device(&request(), &[device("a")]);
        assert_eq!(chosen, Some(device("a")));
        assert_eq!(selector.device_load("a").unwrap().current_task_count, 1);
    }

    #[test]
    fn offline_devices_are_skipped() {
        let selector = selector();
        selector.update_device_status("a", DeviceStatus::Offline);
        selector.update_device_load("b", 90.0, 90.0, 90.0, 300).unwrap();

        let chosen = selector.select_best_device(&request(), &[device("a"), device("b")]);
        assert_eq!(chosen, Some(device("b")));

        selector.update_device_status("b", DeviceStatus::Offline);
        assert_eq!(selector.select_best_device(&request(), &[device("a"), device("b")]), None);
    }

    #[test]
    fn ties_prefer_shorter_queue_then_input_order() {
        let selector = selector();
        let candidates = [device("a"), device("b"), device("c")];
        // all idle: first in input order
        assert_eq!(selector.select_best_device(&request(), &candidates), Some(device("a")));
        // a now has one task and the same score band: b wins on queue depth
        assert_eq!(selector.select_best_device(&request(), &candidates), Some(device("b")));
        assert_eq!(selector.select_best_device(&request(), &candidates), Some(device("c")));
    }

    #[test]
    fn lease_drop_releases_once() {
        let selector = selector();
        let lease = selector.acquire(&request(), &[device("a")]).unwrap();
        assert_eq!(lease.device(), &device("a"));
        assert_eq!(selector.device_load("a").unwrap().current_task_count, 1);
        drop(lease);
        assert_eq!(selector.device_load("a").unwrap().current_task_count, 0);
        assert!(!selector.release_device("a"));
    }

    #[test]
    fn telemetry_must_be_percentages() {
        let selector = selector();
        assert!(selector.update_device_load("a", 101.0, 0.0, 0.0, 1).is_err());
        assert!(selector.update_device_load("a", f64::NAN, 0.0, 0.0, 1).is_err());
        assert!(selector.update_device_load("", 1.0, 0.0, 0.0, 1).is_err());
        assert!(selector.device_load("a").is_none());
    }

    #[test]
    fn utilization_aggregates_registry() {
        let selector = selector();
        selector.update_device_load("a", 20.0, 40.0, 60.0, 10).unwrap();
        selector.update_device_load("b", 40.0, 60.0, 80.0, 30).unwrap();
        selector.update_device_status("b", DeviceStatus::Busy);
        selector.select_best_device(&request(), &[device("a")]);

        let stats = selector.utilization_statistics();
        assert_eq!(stats.device_count, 2);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.avg_cpu_pct, 30.0);
        assert_eq!(stats.avg_latency_ms, 20.0);
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.lifetime_tasks, 1);
    }
}
