//! USB Hotplug Notification Library
//!
//! This crate provides the hotplug subsystem of a USB device-access layer:
//! a per-context registry of filtered callbacks, matched against device
//! arrival and departure events and dispatched from whatever thread detects
//! them.
//!
//! # Guarantees
//!
//! - Callbacks are never invoked with an internal lock held, so they may block
//!   and may call [`HotplugContext::register`] or
//!   [`HotplugContext::deregister`] on the same context.
//! - Within one [`notify`](HotplugContext::notify) pass each active, matching
//!   callback runs at most once.
//! - After `deregister` returns, no pass that starts later invokes the
//!   callback.
//! - On departure, every open handle on the device is notified exactly once.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use hotplug::{
//!     DeviceDescriptor, DeviceId, EventMask, HotplugContext, HotplugEvent, HotplugRegistration,
//!     OpenHandle, PlatformBackend, UsbDevice,
//! };
//!
//! #[derive(Debug)]
//! struct Backend;
//!
//! impl PlatformBackend for Backend {
//!     fn has_hotplug(&self) -> bool {
//!         true
//!     }
//!
//!     fn handle_disconnect(&self, _handle: &OpenHandle) {}
//! }
//!
//! let ctx = HotplugContext::new(Arc::new(Backend));
//!
//! let handle = ctx
//!     .register(
//!         HotplugRegistration::new(EventMask::ARRIVED | EventMask::LEFT)
//!             .vendor_id(0x045a)
//!             .callback(|_ctx, device, event| {
//!                 println!("{} {}", device, event);
//!                 false // keep armed
//!             }),
//!     )
//!     .unwrap();
//!
//! // Normally driven by the platform's detection thread
//! let device = UsbDevice::new(DeviceId(1), 1, 4, DeviceDescriptor::new(0x045a, 0x5005, 0));
//! ctx.notify(&device, HotplugEvent::Arrived);
//!
//! ctx.deregister(handle);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod record;
pub mod registry;
pub mod usb_ids;

pub use backend::{NoHotplug, PlatformBackend};
pub use config::HotplugConfig;
pub use context::{HotplugContext, HotplugRegistration};
pub use device::{DeviceDescriptor, DeviceId, DeviceList, OpenHandle, OpenHandleList, UsbDevice};
pub use dispatch::{DispatchSummary, Outcome};
pub use error::{ConfigError, HotplugError};
pub use event::{EventMask, HotplugEvent, HotplugFlags};
pub use filter::{DeviceFilter, MATCH_ANY};
pub use record::{CallbackAction, CallbackHandle, ContextId, Lifecycle};
pub use registry::CallbackRegistry;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// User callbacks never run under these locks, so poisoning can only come
/// from a panic inside this crate's own short critical sections.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
