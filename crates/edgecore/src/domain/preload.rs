#![forbid(unsafe_code)]

use super::SegmentKey;
use std::{fmt, time::SystemTime};

/// Link class reported for the viewer of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkQuality {
    Wide,
    Medium,
    Narrow,
    /// Poor or not yet measured.
    #[default]
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadStatus {
    Loading,
    Completed,
    Failed,
    Cancelled,
}

impl PreloadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PreloadStatus::Loading)
    }
}

/// Registry key of a preload: one per stream task and playback offset.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreloadKey {
    pub stream_task_id: u64,
    pub offset_secs: u64,
}

impl PreloadKey {
    pub fn new(stream_task_id: u64, offset_secs: u64) -> Self {
        Self {
            stream_task_id,
            offset_secs,
        }
    }
}

impl fmt::Display for PreloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stream_task_id, self.offset_secs)
    }
}

impl fmt::Debug for PreloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreloadKey").field(&format_args!("{self}")).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreloadTask {
    /// Distinguishes successive runs registered under the same key.
    pub run_id: u64,
    pub stream_task_id: u64,
    pub current_playback_offset: u64,
    /// Segments to warm, nearest first.
    pub targets: Vec<SegmentKey>,
    pub network_quality: NetworkQuality,
    pub status: PreloadStatus,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub error_detail: Option<String>,
}

impl PreloadTask {
    pub fn key(&self) -> PreloadKey {
        PreloadKey::new(self.stream_task_id, self.current_playback_offset)
    }

    /// First segment past the current playback position.
    pub fn target_key(&self) -> Option<SegmentKey> {
        self.targets.first().copied()
    }
}
