#![forbid(unsafe_code)]

mod device;
mod ids;
mod inference;
mod preload;
mod segment;

pub use device::{DeviceDescriptor, DeviceLoadStatus, DeviceScore, DeviceStatus, HardwareClass};
pub use ids::{ContentHash, SegmentKey};
pub use inference::{CachedInferenceResult, InferenceRequest};
pub use preload::{NetworkQuality, PreloadKey, PreloadStatus, PreloadTask};
pub use segment::CachedSegment;
