//! Simulated platform backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hotplug::{DeviceId, OpenHandle, PlatformBackend};
use tracing::info;

/// A disconnect notification delivered to an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRecord {
    /// Id of the open handle
    pub handle_id: u64,
    /// Device the handle referenced
    pub device: DeviceId,
}

/// Platform backend with a switchable hotplug capability that records
/// every disconnect it is asked to perform
#[derive(Debug)]
pub struct SimBackend {
    hotplug: AtomicBool,
    disconnects: Mutex<Vec<DisconnectRecord>>,
}

impl SimBackend {
    /// Create a backend that supports hotplug
    pub fn new() -> Self {
        Self::with_hotplug(true)
    }

    /// Create a backend with the given hotplug capability
    pub fn with_hotplug(supported: bool) -> Self {
        Self {
            hotplug: AtomicBool::new(supported),
            disconnects: Mutex::new(Vec::new()),
        }
    }

    /// Change the reported hotplug capability
    pub fn set_hotplug(&self, supported: bool) {
        self.hotplug.store(supported, Ordering::Release);
    }

    /// Every disconnect delivered so far, in delivery order
    pub fn disconnects(&self) -> Vec<DisconnectRecord> {
        self.records().clone()
    }

    /// Number of disconnects delivered for a given open handle
    pub fn disconnect_count(&self, handle_id: u64) -> usize {
        self.disconnects()
            .iter()
            .filter(|d| d.handle_id == handle_id)
            .count()
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBackend for SimBackend {
    fn has_hotplug(&self) -> bool {
        self.hotplug.load(Ordering::Acquire)
    }

    fn handle_disconnect(&self, handle: &OpenHandle) {
        info!(
            "Handle {} disconnected from {}",
            handle.id(),
            handle.device()
        );
        self.records().push(DisconnectRecord {
            handle_id: handle.id(),
            device: handle.device().id(),
        });
    }
}

impl SimBackend {
    /// Recorded disconnects; a panic elsewhere never loses them
    fn records(&self) -> MutexGuard<'_, Vec<DisconnectRecord>> {
        self.disconnects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug::{DeviceDescriptor, OpenHandleList, UsbDevice};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capability_toggle() {
        let backend = SimBackend::new();
        assert!(backend.has_hotplug());
        backend.set_hotplug(false);
        assert!(!backend.has_hotplug());
        assert!(!SimBackend::with_hotplug(false).has_hotplug());
    }

    #[test]
    fn test_disconnects_survive_poisoned_lock() {
        let backend = Arc::new(SimBackend::new());
        let device = Arc::new(UsbDevice::new(
            DeviceId(1),
            1,
            2,
            DeviceDescriptor::new(0x0403, 0x6001, 0),
        ));
        let handles = OpenHandleList::new();
        let first = handles.open(Arc::clone(&device));
        backend.handle_disconnect(&first);

        let b = Arc::clone(&backend);
        let _ = thread::spawn(move || {
            let _guard = b.disconnects.lock().unwrap();
            panic!("poison the disconnect log");
        })
        .join();
        assert!(backend.disconnects.is_poisoned());

        let second = handles.open(device);
        backend.handle_disconnect(&second);

        assert_eq!(backend.disconnects().len(), 2);
        assert_eq!(backend.disconnect_count(second.id()), 1);
    }
}
