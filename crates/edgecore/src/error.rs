#![forbid(unsafe_code)]

use crate::domain::SegmentKey;
use std::{io, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("segment {key} unavailable: {reason}")]
    SegmentUnavailable { key: SegmentKey, reason: String },

    #[error("origin fetch for segment {key} timed out after {timeout:?}")]
    BackendTimeout { key: SegmentKey, timeout: Duration },

    #[error("failed to write segment {key} to disk cache: {source}")]
    CacheWrite {
        key: SegmentKey,
        #[source]
        source: io::Error,
    },

    #[error("no candidate device available")]
    NoCandidateDevice,

    #[error("inference on device {device_id} exceeded its {deadline:?} deadline")]
    DeadlineExceeded { device_id: String, deadline: Duration },

    #[error("inference on device {device_id} failed: {reason}")]
    Inference { device_id: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BackendTimeout { .. }
                | Error::SegmentUnavailable { .. }
                | Error::DeadlineExceeded { .. }
        )
    }

    /// Rebuild an owned error for a segment read from one shared by
    /// coalesced waiters.
    pub(crate) fn for_segment(key: SegmentKey, shared: &Error) -> Self {
        match shared {
            Error::BackendTimeout { key, timeout } => Error::BackendTimeout {
                key: *key,
                timeout: *timeout,
            },
            Error::SegmentUnavailable { key, reason } => Error::SegmentUnavailable {
                key: *key,
                reason: reason.clone(),
            },
            other => Error::SegmentUnavailable {
                key,
                reason: other.to_string(),
            },
        }
    }
}
