#![forbid(unsafe_code)]

use crate::domain::DeviceDescriptor;
use crate::selector::registry::DeviceLoad;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// One task slot taken on a selected device. The slot is given back exactly
/// once, when the lease is released or dropped.
pub struct DeviceLease {
    device: DeviceDescriptor,
    load: Arc<DeviceLoad>,
}

impl DeviceLease {
    pub(crate) fn new(device: DeviceDescriptor, load: Arc<DeviceLoad>) -> Self {
        Self { device, load }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.load.release();
        trace!(device_id = %self.device.device_id, "device lease released");
    }
}

impl fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLease")
            .field("device_id", &self.device.device_id)
            .finish()
    }
}
