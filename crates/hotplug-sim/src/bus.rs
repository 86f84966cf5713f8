//! Virtual USB bus
//!
//! Plays the part of the platform's device-change detection: it keeps the
//! context's device list up to date and calls `notify` on every change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hotplug::{
    DeviceDescriptor, DeviceId, DispatchSummary, HotplugContext, HotplugEvent, OpenHandle,
    PlatformBackend, UsbDevice,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::SimBackend;
use crate::error::SimError;

/// Configuration for a simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    /// Display label
    #[serde(default)]
    pub label: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// bDeviceClass
    #[serde(default)]
    pub device_class: u8,
}

impl VirtualDeviceConfig {
    pub fn new(vendor_id: u16, product_id: u16, device_class: u8) -> Self {
        Self {
            label: String::new(),
            vendor_id,
            product_id,
            device_class,
        }
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(self.vendor_id, self.product_id, self.device_class)
    }
}

/// Simulated bus attached to one hotplug context
#[derive(Debug)]
pub struct VirtualBus {
    ctx: Arc<HotplugContext>,
    backend: Arc<SimBackend>,
    bus_number: u8,
    next_device: AtomicU64,
}

impl VirtualBus {
    /// Create a bus with a fresh context and hotplug-capable backend
    pub fn new() -> Self {
        let backend = Arc::new(SimBackend::new());
        let ctx = Arc::new(HotplugContext::new(Arc::clone(&backend) as Arc<dyn PlatformBackend>));
        Self::with_context(ctx, backend)
    }

    /// Attach a bus to an existing context
    ///
    /// `backend` should be the same backend the context was created with,
    /// so disconnects can be observed through it.
    pub fn with_context(ctx: Arc<HotplugContext>, backend: Arc<SimBackend>) -> Self {
        Self {
            ctx,
            backend,
            bus_number: 1,
            next_device: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> &Arc<HotplugContext> {
        &self.ctx
    }

    pub fn backend(&self) -> &Arc<SimBackend> {
        &self.backend
    }

    /// Attach a device and deliver `Arrived`
    pub fn plug(&self, config: &VirtualDeviceConfig) -> (Arc<UsbDevice>, DispatchSummary) {
        let id = DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed));
        let address = (id.as_u64() % 127 + 1) as u8;
        let device = Arc::new(UsbDevice::new(id, self.bus_number, address, config.descriptor()));

        self.ctx.devices().add(Arc::clone(&device));
        info!("Plugged {} {} {}", id, device, config.label);
        let summary = self.ctx.notify(&device, HotplugEvent::Arrived);

        (device, summary)
    }

    /// Detach a device and deliver `Left`
    pub fn unplug(&self, id: DeviceId) -> Result<(Arc<UsbDevice>, DispatchSummary), SimError> {
        let device = self
            .ctx
            .devices()
            .remove(id)
            .ok_or(SimError::UnknownDevice(id))?;

        info!("Unplugged {} {}", id, device);
        let summary = self.ctx.notify(&device, HotplugEvent::Left);
        Ok((device, summary))
    }

    /// Open a handle on an attached device
    pub fn open(&self, id: DeviceId) -> Result<Arc<OpenHandle>, SimError> {
        let device = self
            .ctx
            .devices()
            .get(id)
            .ok_or(SimError::UnknownDevice(id))?;
        Ok(self.ctx.open_handles().open(device))
    }

    /// Close an open handle
    pub fn close(&self, handle: &OpenHandle) -> bool {
        self.ctx.open_handles().close(handle)
    }

    /// Report a transfer failure that means the device is gone
    ///
    /// Removes the device and synthesizes a departure. A device that has
    /// already left is not reported again.
    pub fn transfer_failed(&self, handle: &OpenHandle) -> DispatchSummary {
        let device = Arc::clone(handle.device());
        if self.ctx.devices().remove(device.id()).is_none() {
            debug!("Transfer failed on handle {}; {} already gone", handle.id(), device.id());
            return DispatchSummary::default();
        }

        debug!("Transfer failed on handle {}; treating {} as gone", handle.id(), device.id());
        self.ctx.device_left(&device)
    }

    /// Devices currently attached
    pub fn devices(&self) -> Vec<Arc<UsbDevice>> {
        self.ctx.devices().snapshot()
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}
