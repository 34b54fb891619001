#![forbid(unsafe_code)]

use crate::domain::{DeviceLoadStatus, DeviceScore};
use config::{MAX_TOTAL_SCORE, SelectorConfig};

/// Sum of the five band scores for one telemetry snapshot, capped at
/// [`MAX_TOTAL_SCORE`].
pub fn score(bands: &SelectorConfig, load: &DeviceLoadStatus) -> DeviceScore {
    let cpu = bands.cpu.points(load.cpu_usage_pct);
    let memory = bands.memory.points(load.memory_usage_pct);
    let gpu = bands.gpu.points(load.gpu_usage_pct);
    let network = bands.latency_ms.points(f64::from(load.network_latency_ms));
    let queue_depth = bands.queue_depth.points(f64::from(load.current_task_count));

    DeviceScore {
        cpu,
        memory,
        gpu,
        network,
        queue_depth,
        total: (cpu + memory + gpu + network + queue_depth).min(MAX_TOTAL_SCORE),
    }
}
