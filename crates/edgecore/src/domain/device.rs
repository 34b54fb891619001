#![forbid(unsafe_code)]

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareClass {
    CpuOnly,
    IntegratedGpu,
    DiscreteGpu,
    Accelerator,
}

/// Identity of an edge device as supplied by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub device_name: String,
    pub hardware_class: HardwareClass,
}

impl DeviceDescriptor {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        hardware_class: HardwareClass,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            hardware_class,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    #[default]
    Online = 0,
    Offline = 1,
    Busy = 2,
}

impl DeviceStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => DeviceStatus::Offline,
            2 => DeviceStatus::Busy,
            _ => DeviceStatus::Online,
        }
    }
}

/// Point-in-time copy of a device's telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLoadStatus {
    pub device_id: String,
    pub cpu_usage_pct: f64,
    pub memory_usage_pct: f64,
    pub gpu_usage_pct: f64,
    pub network_latency_ms: u32,
    pub current_task_count: u32,
    pub total_task_count: u64,
    pub status: DeviceStatus,
    /// `None` until the first telemetry push.
    pub last_update_time: Option<SystemTime>,
}

impl DeviceLoadStatus {
    /// Telemetry assumed for a device never seen before.
    pub fn idle(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            cpu_usage_pct: 0.0,
            memory_usage_pct: 0.0,
            gpu_usage_pct: 0.0,
            network_latency_ms: 0,
            current_task_count: 0,
            total_task_count: 0,
            status: DeviceStatus::Online,
            last_update_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceScore {
    pub cpu: u32,
    pub memory: u32,
    pub gpu: u32,
    pub network: u32,
    pub queue_depth: u32,
    pub total: u32,
}
