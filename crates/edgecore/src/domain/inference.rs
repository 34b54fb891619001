#![forbid(unsafe_code)]

use super::ContentHash;
use bytes::Bytes;
use std::time::SystemTime;

/// What the caller wants computed for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    /// Tag of the produced result, e.g. `face_detection`.
    pub result_type: String,
}

impl InferenceRequest {
    pub fn new(result_type: impl Into<String>) -> Self {
        Self {
            result_type: result_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedInferenceResult {
    pub content_hash: ContentHash,
    pub result: Bytes,
    pub result_type: String,
    pub cached_at: SystemTime,
}
