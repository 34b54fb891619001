#![forbid(unsafe_code)]

use crate::domain::{DeviceLoadStatus, DeviceStatus};
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Live telemetry of one device. Every field is independently atomic so
/// telemetry pushes and task accounting never contend on a lock.
#[derive(Debug)]
pub(crate) struct DeviceLoad {
    cpu_bits: AtomicU64,
    memory_bits: AtomicU64,
    gpu_bits: AtomicU64,
    latency_ms: AtomicU32,
    current_tasks: AtomicU32,
    lifetime_tasks: AtomicU64,
    status: AtomicU8,
    /// Milliseconds since the epoch, 0 before the first telemetry push.
    updated_at_ms: AtomicU64,
}

impl DeviceLoad {
    /// No load at all: a device without telemetry scores as fully idle.
    fn idle() -> Self {
        Self {
            cpu_bits: AtomicU64::new(0f64.to_bits()),
            memory_bits: AtomicU64::new(0f64.to_bits()),
            gpu_bits: AtomicU64::new(0f64.to_bits()),
            latency_ms: AtomicU32::new(0),
            current_tasks: AtomicU32::new(0),
            lifetime_tasks: AtomicU64::new(0),
            status: AtomicU8::new(DeviceStatus::Online as u8),
            updated_at_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn snapshot(&self, device_id: &str) -> DeviceLoadStatus {
        let updated_at_ms = self.updated_at_ms.load(Ordering::Acquire);
        DeviceLoadStatus {
            device_id: device_id.to_owned(),
            cpu_usage_pct: f64::from_bits(self.cpu_bits.load(Ordering::Relaxed)),
            memory_usage_pct: f64::from_bits(self.memory_bits.load(Ordering::Relaxed)),
            gpu_usage_pct: f64::from_bits(self.gpu_bits.load(Ordering::Relaxed)),
            network_latency_ms: self.latency_ms.load(Ordering::Relaxed),
            current_task_count: self.current_tasks.load(Ordering::Acquire),
            total_task_count: self.lifetime_tasks.load(Ordering::Relaxed),
            status: self.status(),
            last_update_time: (updated_at_ms > 0)
                .then(|| SystemTime::UNIX_EPOCH + Duration::from_millis(updated_at_ms)),
        }
    }

    pub(crate) fn status(&self) -> DeviceStatus {
        DeviceStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub(crate) fn set_status(&self, status: DeviceStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, cpu: f64, memory: f64, gpu: f64, latency_ms: u32, now: SystemTime) {
        self.cpu_bits.store(cpu.to_bits(), Ordering::Relaxed);
        self.memory_bits.store(memory.to_bits(), Ordering::Relaxed);
        self.gpu_bits.store(gpu.to_bits(), Ordering::Relaxed);
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
        let millis = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(1, |since| since.as_millis().max(1) as u64);
        self.updated_at_ms.store(millis, Ordering::Release);
    }

    /// Take one task slot, provided nobody else has since `observed` was read.
    pub(crate) fn try_claim(&self, observed: u32) -> bool {
        let claimed = self
            .current_tasks
            .compare_exchange(
                observed,
                observed.saturating_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.lifetime_tasks.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Take one task slot unconditionally.
    pub(crate) fn claim(&self) {
        self.current_tasks.fetch_add(1, Ordering::AcqRel);
        self.lifetime_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Give back one task slot. Never drops below zero.
    pub(crate) fn release(&self) -> bool {
        self.current_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tasks| {
                tasks.checked_sub(1)
            })
            .is_ok()
    }
}

/// Telemetry for every device seen so far. Entries are created on first
/// sight and never removed.
#[derive(Debug, Default)]
pub(crate) struct DeviceRegistry {
    devices: DashMap<String, Arc<DeviceLoad>>,
}

impl DeviceRegistry {
    pub(crate) fn entry(&self, device_id: &str) -> Arc<DeviceLoad> {
        if let Some(load) = self.devices.get(device_id) {
            return Arc::clone(&load);
        }
        Arc::clone(
            &self
                .devices
                .entry(device_id.to_owned())
                .or_insert_with(|| Arc::new(DeviceLoad::idle())),
        )
    }

    pub(crate) fn get(&self, device_id: &str) -> Option<Arc<DeviceLoad>> {
        self.devices.get(device_id).map(|load| Arc::clone(&load))
    }

    pub(crate) fn release(&self, device_id: &str) -> bool {
        let Some(load) = self.get(device_id) else {
            warn!(device_id, "release for unknown device");
            return false;
        };
        let released = load.release();
        if !released {
            warn!(device_id, "release without a matching selection");
        }
        released
    }

    pub(crate) fn snapshots(&self) -> Vec<DeviceLoadStatus> {
        self.devices
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_devices_start_idle() {
        let registry = DeviceRegistry::default();
        let snapshot = registry.entry("cam-1").snapshot("cam-1");
        assert_eq!(snapshot, DeviceLoadStatus::idle("cam-1"));
    }

    #[test]
    fn claim_fails_on_stale_observation() {
        let load = DeviceLoad::idle();
        assert!(load.try_claim(0));
        assert!(!load.try_claim(0));
        assert!(load.try_claim(1));
        assert_eq!(load.snapshot("d").current_task_count, 2);
        assert_eq!(load.snapshot("d").total_task_count, 2);
    }

    #[test]
    fn release_saturates_at_zero() {
        let load = DeviceLoad::idle();
        load.claim();
        assert!(load.release());
        assert!(!load.release());
        assert_eq!(load.snapshot("d").current_task_count, 0);
        assert_eq!(load.snapshot("d").total_task_count, 1);
    }

    #[test]
    fn telemetry_is_stamped() {
        let load = DeviceLoad::idle();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        load.record(12.5, 40.0, 3.0, 18, now);
        let snapshot = load.snapshot("d");
        assert_eq!(snapshot.cpu_usage_pct, 12.5);
        assert_eq!(snapshot.network_latency_ms, 18);
        assert_eq!(snapshot.last_update_time, Some(now));
    }
}
