#![forbid(unsafe_code)]

mod backend;
mod disk;
mod memory;
mod tiered;

pub use backend::{FsSegmentBackend, SegmentBackend};
pub use disk::{CleanupReport, DiskTier};
pub use memory::MemoryTier;
pub use tiered::{SegmentCacheStatistics, TieredSegmentCache};
