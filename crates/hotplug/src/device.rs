//! Devices and open handles owned by a context
//!
//! These are the collaborators the hotplug subsystem consumes. The device
//! list is populated by the platform backend and read by enumerate-on-register;
//! the open-handle list is notified on departure. Each has its own mutex,
//! independent of the callback registry lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lock;

/// Identity of a connected device within a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Descriptor fields used for hotplug matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// bDeviceClass
    pub device_class: u8,
}

impl DeviceDescriptor {
    pub const fn new(vendor_id: u16, product_id: u16, device_class: u8) -> Self {
        Self {
            vendor_id,
            product_id,
            device_class,
        }
    }
}

/// A connected USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    id: DeviceId,
    bus_number: u8,
    address: u8,
    descriptor: DeviceDescriptor,
}

impl UsbDevice {
    pub fn new(id: DeviceId, bus_number: u8, address: u8, descriptor: DeviceDescriptor) -> Self {
        Self {
            id,
            bus_number,
            address,
            descriptor,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id
    }

    pub fn device_class(&self) -> u8 {
        self.descriptor.device_class
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}:{:03} {:04x}:{:04x}",
            self.bus_number, self.address, self.descriptor.vendor_id, self.descriptor.product_id
        )
    }
}

/// Mutex-guarded list of devices currently attached to a context
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Mutex<Vec<Arc<UsbDevice>>>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, replacing any existing entry with the same id
    pub fn add(&self, device: Arc<UsbDevice>) {
        let mut devices = lock(&self.devices);
        devices.retain(|d| d.id() != device.id());
        debug!("Device list: added {} ({})", device.id(), device);
        devices.push(device);
    }

    /// Remove a device by id
    pub fn remove(&self, id: DeviceId) -> Option<Arc<UsbDevice>> {
        let mut devices = lock(&self.devices);
        let pos = devices.iter().position(|d| d.id() == id)?;
        Some(devices.swap_remove(pos))
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<UsbDevice>> {
        lock(&self.devices).iter().find(|d| d.id() == id).cloned()
    }

    /// Copy of the current list, taken under the lock
    pub fn snapshot(&self) -> Vec<Arc<UsbDevice>> {
        lock(&self.devices).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static NEXT_OPEN_HANDLE: AtomicU64 = AtomicU64::new(1);

/// An open handle on a device
///
/// Closing and releasing handles happens outside this crate; the hotplug
/// subsystem only delivers the one-shot disconnect notification.
#[derive(Debug)]
pub struct OpenHandle {
    id: u64,
    device: Arc<UsbDevice>,
    disconnected: AtomicBool,
}

impl OpenHandle {
    fn new(device: Arc<UsbDevice>) -> Self {
        Self {
            id: NEXT_OPEN_HANDLE.fetch_add(1, Ordering::Relaxed),
            device,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Arc<UsbDevice> {
        &self.device
    }

    /// Whether the device behind this handle has departed
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Flag the handle as disconnected; true only for the first caller
    pub(crate) fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::AcqRel)
    }
}

/// Mutex-guarded list of open handles in a context
#[derive(Debug, Default)]
pub struct OpenHandleList {
    handles: Mutex<Vec<Arc<OpenHandle>>>,
}

impl OpenHandleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new handle on a device
    pub fn open(&self, device: Arc<UsbDevice>) -> Arc<OpenHandle> {
        let handle = Arc::new(OpenHandle::new(device));
        lock(&self.handles).push(Arc::clone(&handle));
        debug!("Opened handle {} on {}", handle.id(), handle.device().id());
        handle
    }

    /// Close a handle; returns false if it was not open
    pub fn close(&self, handle: &OpenHandle) -> bool {
        let mut handles = lock(&self.handles);
        match handles.iter().position(|h| h.id() == handle.id()) {
            Some(pos) => {
                handles.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Handles currently open on the given device
    pub fn handles_for(&self, device: DeviceId) -> Vec<Arc<OpenHandle>> {
        lock(&self.handles)
            .iter()
            .filter(|h| h.device().id() == device)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u64, vid: u16) -> Arc<UsbDevice> {
        Arc::new(UsbDevice::new(
            DeviceId(id),
            1,
            id as u8,
            DeviceDescriptor::new(vid, 0x0001, 0),
        ))
    }

    #[test]
    fn test_device_list_add_remove() {
        let list = DeviceList::new();
        list.add(device(1, 0x045A));
        list.add(device(2, 0x0403));
        assert_eq!(list.len(), 2);

        let removed = list.remove(DeviceId(1)).unwrap();
        assert_eq!(removed.vendor_id(), 0x045A);
        assert!(list.remove(DeviceId(1)).is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_device_list_replaces_same_id() {
        let list = DeviceList::new();
        list.add(device(7, 0x045A));
        list.add(device(7, 0x0403));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(DeviceId(7)).unwrap().vendor_id(), 0x0403);
    }

    #[test]
    fn test_open_handles_for_device() {
        let handles = OpenHandleList::new();
        let a = device(1, 0x045A);
        let b = device(2, 0x045A);

        let h1 = handles.open(Arc::clone(&a));
        let _h2 = handles.open(Arc::clone(&a));
        let _h3 = handles.open(b);

        assert_eq!(handles.handles_for(DeviceId(1)).len(), 2);
        assert!(handles.close(&h1));
        assert!(!handles.close(&h1));
        assert_eq!(handles.handles_for(DeviceId(1)).len(), 1);
    }

    #[test]
    fn test_disconnect_flag_is_one_shot() {
        let handles = OpenHandleList::new();
        let h = handles.open(device(1, 0x045A));
        assert!(!h.is_disconnected());
        assert!(h.mark_disconnected());
        assert!(!h.mark_disconnected());
        assert!(h.is_disconnected());
    }

    #[test]
    fn test_display() {
        let d = device(3, 0x045A);
        assert_eq!(d.to_string(), "001:003 045a:0001");
        assert_eq!(d.id().to_string(), "dev#3");
    }
}
