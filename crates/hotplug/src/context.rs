//! Hotplug context and the registration API
//!
//! A context owns one callback registry, one device list and one open-handle
//! list, each behind its own lock. Lock order is callback registry first, then
//! device list or open-handle list, and no two of them are ever held at once.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::PlatformBackend;
use crate::config::HotplugConfig;
use crate::device::{DeviceList, OpenHandleList, UsbDevice};
use crate::dispatch::{self, Outcome};
use crate::error::HotplugError;
use crate::event::{EventMask, HotplugEvent, HotplugFlags};
use crate::filter::{DeviceFilter, MATCH_ANY};
use crate::record::{CallbackAction, CallbackHandle, ContextId, SharedCallback};
use crate::registry::CallbackRegistry;

/// Parameters for a callback registration
///
/// Filter fields default to [`MATCH_ANY`]. Raw values are validated by
/// [`HotplugContext::register`], not here.
///
/// ```rust
/// use hotplug::{EventMask, HotplugFlags, HotplugRegistration};
///
/// let registration = HotplugRegistration::new(EventMask::ALL)
///     .vendor_id(0x045a)
///     .product_id(0x5005)
///     .flags(HotplugFlags::ENUMERATE)
///     .callback(|_ctx, device, event| {
///         println!("{} {}", device, event);
///         false
///     });
/// ```
pub struct HotplugRegistration {
    events: EventMask,
    flags: HotplugFlags,
    vendor_id: i32,
    product_id: i32,
    device_class: i32,
    callback: Option<SharedCallback>,
}

impl HotplugRegistration {
    /// Start a registration for the given events, matching any device
    pub fn new(events: EventMask) -> Self {
        Self {
            events,
            flags: HotplugFlags::NONE,
            vendor_id: MATCH_ANY,
            product_id: MATCH_ANY,
            device_class: MATCH_ANY,
            callback: None,
        }
    }

    pub fn flags(mut self, flags: HotplugFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = i32::from(vendor_id);
        self
    }

    pub fn product_id(mut self, product_id: u16) -> Self {
        self.product_id = i32::from(product_id);
        self
    }

    pub fn device_class(mut self, device_class: u8) -> Self {
        self.device_class = i32::from(device_class);
        self
    }

    /// Use all three fields of a typed filter
    pub fn filter(mut self, filter: DeviceFilter) -> Self {
        self.vendor_id = filter.vendor_id.map_or(MATCH_ANY, i32::from);
        self.product_id = filter.product_id.map_or(MATCH_ANY, i32::from);
        self.device_class = filter.device_class.map_or(MATCH_ANY, i32::from);
        self
    }

    /// Set raw filter values, [`MATCH_ANY`] meaning unconstrained
    pub fn raw_filter(mut self, vendor_id: i32, product_id: i32, device_class: i32) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self.device_class = device_class;
        self
    }

    /// Set the callback
    ///
    /// Returning `true` (or [`CallbackAction::Deregister`]) removes the
    /// registration; `false` keeps it armed.
    pub fn callback<F, R>(mut self, callback: F) -> Self
    where
        F: Fn(&HotplugContext, &UsbDevice, HotplugEvent) -> R + Send + Sync + 'static,
        R: Into<CallbackAction>,
    {
        self.callback = Some(share_callback(callback));
        self
    }
}

impl fmt::Debug for HotplugRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotplugRegistration")
            .field("events", &self.events)
            .field("flags", &self.flags)
            .field("vendor_id", &self.vendor_id)
            .field("product_id", &self.product_id)
            .field("device_class", &self.device_class)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

fn share_callback<F, R>(callback: F) -> SharedCallback
where
    F: Fn(&HotplugContext, &UsbDevice, HotplugEvent) -> R + Send + Sync + 'static,
    R: Into<CallbackAction>,
{
    Arc::new(
        move |ctx: &HotplugContext, device: &UsbDevice, event: HotplugEvent| {
            callback(ctx, device, event).into()
        },
    )
}

/// Owning scope for hotplug callbacks, devices and open handles
///
/// All methods take `&self`; share the context between threads with `Arc`.
/// Callbacks receive the context and may call [`register`](Self::register)
/// and [`deregister`](Self::deregister) re-entrantly.
///
/// Dropping the context tears down every registration. Callbacks that capture
/// an `Arc` of their own context keep it alive; call
/// [`teardown`](Self::teardown) explicitly in that case.
pub struct HotplugContext {
    id: ContextId,
    config: HotplugConfig,
    backend: Arc<dyn PlatformBackend>,
    callbacks: CallbackRegistry,
    devices: DeviceList,
    open_handles: OpenHandleList,
}

impl HotplugContext {
    /// Create a context with default configuration
    pub fn new(backend: Arc<dyn PlatformBackend>) -> Self {
        Self::with_config(backend, HotplugConfig::default())
    }

    /// Create a context with custom configuration
    pub fn with_config(backend: Arc<dyn PlatformBackend>, config: HotplugConfig) -> Self {
        let id = ContextId::next();
        debug!(
            "Created hotplug context {} (backend hotplug: {})",
            id,
            backend.has_hotplug()
        );
        Self {
            id,
            callbacks: CallbackRegistry::with_capacity_limit(config.max_callbacks),
            config,
            backend,
            devices: DeviceList::new(),
            open_handles: OpenHandleList::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &HotplugConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn PlatformBackend> {
        &self.backend
    }

    /// Callback registry (introspection)
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Devices currently attached, maintained by the backend
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// Handles currently open, maintained by the device-access layer
    pub fn open_handles(&self) -> &OpenHandleList {
        &self.open_handles
    }

    /// Whether hotplug events can be delivered in this context
    pub fn has_hotplug(&self) -> bool {
        self.config.hotplug_enabled && self.backend.has_hotplug()
    }

    /// Register a hotplug callback
    ///
    /// Fails with `NotSupported` before any validation if hotplug is
    /// unavailable, with `InvalidParam` for out-of-range filter values or a
    /// missing callback, and with `NoMem` if the record cannot be allocated.
    /// Nothing is registered on failure.
    ///
    /// With [`HotplugFlags::ENUMERATE`], the callback is invoked with
    /// `Arrived` for every matching device already attached, synchronously,
    /// before this returns. The callback may deregister itself during that
    /// enumeration (by returning `true` or calling
    /// [`deregister`](Self::deregister) on the new handle); remaining devices
    /// are then skipped.
    pub fn register(&self, registration: HotplugRegistration) -> Result<CallbackHandle, HotplugError> {
        if !self.has_hotplug() {
            return Err(HotplugError::NotSupported);
        }

        let filter = DeviceFilter::from_raw(
            registration.vendor_id,
            registration.product_id,
            registration.device_class,
        )?;
        let callback = registration
            .callback
            .ok_or_else(|| HotplugError::InvalidParam("missing callback".to_string()))?;

        let handle = self
            .callbacks
            .insert(self.id, registration.events, filter, callback)?;
        info!(
            "Registered hotplug callback {} on {} (filter {}, events {:#x})",
            handle,
            self.id,
            filter,
            registration.events.bits()
        );

        if registration.flags.contains(HotplugFlags::ENUMERATE) {
            self.enumerate_existing(handle);
        }

        Ok(handle)
    }

    /// Register with positional arguments; filter values use [`MATCH_ANY`]
    /// as the wildcard
    pub fn register_callback<F, R>(
        &self,
        events: EventMask,
        flags: HotplugFlags,
        vendor_id: i32,
        product_id: i32,
        device_class: i32,
        callback: F,
    ) -> Result<CallbackHandle, HotplugError>
    where
        F: Fn(&HotplugContext, &UsbDevice, HotplugEvent) -> R + Send + Sync + 'static,
        R: Into<CallbackAction>,
    {
        self.register(
            HotplugRegistration::new(events)
                .flags(flags)
                .raw_filter(vendor_id, product_id, device_class)
                .callback(callback),
        )
    }

    /// Deregister a callback
    ///
    /// Marks the record for removal and returns immediately. No dispatch pass
    /// that begins after this returns will invoke the callback; an invocation
    /// already underway is not interrupted. Unknown handles and contexts
    /// without hotplug support are ignored.
    pub fn deregister(&self, handle: CallbackHandle) {
        if !self.has_hotplug() {
            return;
        }

        if self.callbacks.mark_pending_free(handle) {
            debug!("Deregistered hotplug callback {} on {}", handle, self.id);
        } else {
            debug!("Ignoring deregister of unknown callback {} on {}", handle, self.id);
        }
    }

    /// Remove every registration without invoking any callback
    ///
    /// Returns the number of records removed. Idempotent.
    pub fn teardown(&self) -> usize {
        let removed = self.callbacks.teardown();
        if removed > 0 {
            info!("Tore down {} hotplug callback(s) on {}", removed, self.id);
        }
        removed
    }

    /// Deliver `Arrived` for attached devices to a freshly registered callback
    fn enumerate_existing(&self, handle: CallbackHandle) {
        let devices = self.devices.snapshot();
        debug!(
            "Enumerating {} existing device(s) for {}",
            devices.len(),
            handle
        );

        for device in devices {
            match dispatch::dispatch_one(self, handle, &device, HotplugEvent::Arrived) {
                Outcome::Skipped | Outcome::Invoked { released: false } => {}
                Outcome::Gone | Outcome::Released | Outcome::Invoked { released: true } => break,
            }
        }
    }
}

impl fmt::Debug for HotplugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotplugContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("callbacks", &self.callbacks.len())
            .field("devices", &self.devices.len())
            .field("open_handles", &self.open_handles.len())
            .finish()
    }
}

impl Drop for HotplugContext {
    fn drop(&mut self) {
        self.teardown();
    }
}
