#![forbid(unsafe_code)]

use crate::domain::{ContentHash, DeviceDescriptor, InferenceRequest};
use crate::error::Error;
use crate::inference::InferenceResultCache;
use crate::selector::EdgeDeviceSelector;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the model on a chosen device.
#[async_trait]
pub trait InferenceExecutor: Send + Sync {
    async fn execute(
        &self,
        device: &DeviceDescriptor,
        request: &InferenceRequest,
        frame: &Bytes,
    ) -> Result<Bytes, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSource {
    Cache,
    Device(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResponse {
    pub result: Bytes,
    pub result_type: String,
    pub source: ResultSource,
}

/// Cache lookup, device placement, deadline-bound execution and write-back
/// for one frame.
pub struct InferenceDispatcher {
    cache: Arc<InferenceResultCache>,
    selector: Arc<EdgeDeviceSelector>,
    deadline: Duration,
}

impl InferenceDispatcher {
    pub fn new(
        cache: Arc<InferenceResultCache>,
        selector: Arc<EdgeDeviceSelector>,
        deadline: Duration,
    ) -> Self {
        Self {
            cache,
            selector,
            deadline,
        }
    }

    pub async fn infer(
        &self,
        frame: &Bytes,
        request: &InferenceRequest,
        candidates: &[DeviceDescriptor],
        executor: &dyn InferenceExecutor,
    ) -> Result<InferenceResponse, Error> {
        let hash = ContentHash::of(frame);
        if let Some(cached) = self.cache.get_cached_result_of(&hash, &request.result_type) {
            debug!(%hash, result_type = %cached.result_type, "inference served from cache");
            return Ok(InferenceResponse {
                result: cached.result,
                result_type: cached.result_type,
                source: ResultSource::Cache,
            });
        }

        let lease = self
            .selector
            .acquire(request, candidates)
            .ok_or(Error::NoCandidateDevice)?;
        let device_id = lease.device().device_id.clone();

        // the lease is dropped on every early return, releasing the slot
        let result =
            match tokio::time::timeout(self.deadline, executor.execute(lease.device(), request, frame))
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(device_id, %err, "inference failed");
                    return Err(err);
                }
                Err(_) => {
                    warn!(device_id, deadline = ?self.deadline, "inference deadline exceeded");
                    return Err(Error::DeadlineExceeded {
                        device_id,
                        deadline: self.deadline,
                    });
                }
            };
        lease.release();

        self.cache
            .cache_result(hash, result.clone(), request.result_type.clone());
        debug!(%hash, device_id, size = result.len(), "inference computed");
        Ok(InferenceResponse {
            result,
            result_type: request.result_type.clone(),
            source: ResultSource::Device(device_id),
        })
    }
}
