//! Error types for the simulated platform

use hotplug::DeviceId;
use thiserror::Error;

/// Errors that can occur on the virtual bus
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No device with this id is attached
    #[error("device {0} is not attached")]
    UnknownDevice(DeviceId),

    /// The detection thread has stopped
    #[error("detection thread has shut down")]
    DetectionStopped,
}
