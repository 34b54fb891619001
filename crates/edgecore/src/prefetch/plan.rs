#![forbid(unsafe_code)]

use crate::domain::{NetworkQuality, SegmentKey};
use crate::error::Error;
use config::PreloadHorizons;
use std::time::Duration;

/// Seconds of video to keep ahead of playback on a link of this class.
pub fn horizon_for(horizons: &PreloadHorizons, quality: NetworkQuality) -> Duration {
    match quality {
        NetworkQuality::Wide => horizons.wide,
        NetworkQuality::Medium => horizons.medium,
        NetworkQuality::Narrow => horizons.narrow,
        NetworkQuality::Poor => horizons.poor,
    }
}

/// Segments covering `horizon` after the one playing at `offset_secs`,
/// nearest first. At least one segment is always planned.
pub fn preload_targets(
    stream_task_id: u64,
    offset_secs: u64,
    horizon: Duration,
    segment_duration: Duration,
) -> Result<Vec<SegmentKey>, Error> {
    let duration = u32::try_from(segment_duration.as_secs())
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "segment duration {segment_duration:?} is not a positive number of seconds"
            ))
        })?;
    let step = u64::from(duration);
    let count = horizon.as_secs().div_ceil(step).max(1);
    let first = (offset_secs / step).saturating_add(1).saturating_mul(step);

    (0..count)
        .map_while(|n| first.checked_add(n * step))
        .map(|start| SegmentKey::new(stream_task_id, start, duration))
        .collect()
}
