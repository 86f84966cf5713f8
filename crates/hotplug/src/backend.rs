//! Platform backend interface
//!
//! The backend owns device-change detection. It tells the context whether
//! hotplug events can be delivered at all and implements the per-handle
//! disconnect routine run when a device departs.

use std::fmt;

use crate::device::OpenHandle;

/// Platform hooks consumed by the hotplug subsystem
pub trait PlatformBackend: Send + Sync + fmt::Debug {
    /// Whether this platform can deliver hotplug events
    fn has_hotplug(&self) -> bool;

    /// Notify an open handle that its device has gone away
    ///
    /// Called at most once per handle, without any context lock held.
    fn handle_disconnect(&self, handle: &OpenHandle);
}

/// Backend without hotplug support; registration returns `NotSupported`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHotplug;

impl PlatformBackend for NoHotplug {
    fn has_hotplug(&self) -> bool {
        false
    }

    fn handle_disconnect(&self, _handle: &OpenHandle) {}
}
