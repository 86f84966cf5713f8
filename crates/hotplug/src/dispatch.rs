//! Notification dispatch
//!
//! Each record visited by a pass goes through three steps:
//!
//! - **Decide** (registry locked): release it if pending, evaluate the
//!   filter, clone out the callback on a match.
//! - **Act** (no lock held): invoke the callback.
//! - **Commit** (registry locked): release it if the callback returned
//!   `Deregister` or the record was deregistered while the callback ran.
//!
//! Departure then notifies every open handle on the device, under the
//! open-handle lock only, regardless of which callbacks matched.

use std::time::{Duration, Instant};

use tracing::{debug, debug_span, trace, warn};

use crate::context::HotplugContext;
use crate::device::UsbDevice;
use crate::event::HotplugEvent;
use crate::record::{CallbackAction, CallbackHandle, SharedCallback};
use crate::registry::Decision;

/// Final state of one record after a dispatch step sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Record was already removed
    Gone,
    /// Record was pending removal and has been released without invocation
    Released,
    /// Record did not match
    Skipped,
    /// Callback ran; `released` is true if the record was then removed
    Invoked { released: bool },
}

/// Per-record dispatch state
enum Step {
    Decide,
    Act(SharedCallback),
    Commit(CallbackAction),
    Finished(Outcome),
}

/// Counts for one `notify` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Callbacks invoked
    pub invoked: usize,
    /// Records removed (pending or deregistered by their callback)
    pub released: usize,
    /// Open handles notified of disconnection
    pub disconnected: usize,
}

/// Drive one record through decide, act and commit
pub(crate) fn dispatch_one(
    ctx: &HotplugContext,
    handle: CallbackHandle,
    device: &UsbDevice,
    event: HotplugEvent,
) -> Outcome {
    let mut step = Step::Decide;
    loop {
        step = match step {
            Step::Decide => match ctx.callbacks().decide(handle, device, event) {
                Decision::Gone => Step::Finished(Outcome::Gone),
                Decision::Released => Step::Finished(Outcome::Released),
                Decision::Skip => Step::Finished(Outcome::Skipped),
                Decision::Invoke(callback) => Step::Act(callback),
            },
            Step::Act(callback) => Step::Commit(invoke(ctx, handle, &callback, device, event)),
            Step::Commit(action) => {
                let released = ctx.callbacks().commit(handle, action);
                Step::Finished(Outcome::Invoked { released })
            }
            Step::Finished(outcome) => return outcome,
        };
    }
}

fn invoke(
    ctx: &HotplugContext,
    handle: CallbackHandle,
    callback: &SharedCallback,
    device: &UsbDevice,
    event: HotplugEvent,
) -> CallbackAction {
    trace!("Invoking {} for {} {}", handle, device.id(), event);
    let started = Instant::now();
    let action = callback(ctx, device, event);
    let elapsed = started.elapsed();

    let threshold = Duration::from_millis(ctx.config().slow_callback_warn_ms);
    if elapsed > threshold {
        warn!(
            "Hotplug callback {} took {}ms handling {} {}",
            handle,
            elapsed.as_millis(),
            device,
            event
        );
    }
    action
}

impl HotplugContext {
    /// Deliver a hotplug event to every matching callback
    ///
    /// Called by the platform backend when a device arrives or leaves. Each
    /// active, matching callback registered before the pass began is invoked
    /// at most once, without any lock held. For [`HotplugEvent::Left`], every
    /// open handle on the device is then sent its disconnect notification,
    /// whether or not any callback matched.
    pub fn notify(&self, device: &UsbDevice, event: HotplugEvent) -> DispatchSummary {
        let span = debug_span!("hotplug_notify", ctx = %self.id(), device = %device.id(), %event);
        let _enter = span.enter();

        let mut summary = DispatchSummary::default();
        for handle in self.callbacks().snapshot_for_dispatch() {
            match dispatch_one(self, handle, device, event) {
                Outcome::Gone | Outcome::Skipped => {}
                Outcome::Released => summary.released += 1,
                Outcome::Invoked { released } => {
                    summary.invoked += 1;
                    if released {
                        summary.released += 1;
                    }
                }
            }
        }

        if event == HotplugEvent::Left {
            summary.disconnected = self.disconnect_open_handles(device);
        }

        debug!(
            "Dispatched {} for {}: {} invoked, {} released, {} handle(s) disconnected",
            event, device, summary.invoked, summary.released, summary.disconnected
        );
        summary
    }

    /// Synthesize a departure, e.g. after a transfer fails because the
    /// device is gone
    pub fn device_left(&self, device: &UsbDevice) -> DispatchSummary {
        self.notify(device, HotplugEvent::Left)
    }

    /// Run the backend disconnect routine once for each handle on the device
    fn disconnect_open_handles(&self, device: &UsbDevice) -> usize {
        let handles = self.open_handles().handles_for(device.id());

        let mut disconnected = 0;
        for handle in handles {
            if handle.mark_disconnected() {
                trace!("Disconnecting handle {} on {}", handle.id(), device.id());
                self.backend().handle_disconnect(&handle);
                disconnected += 1;
            }
        }
        disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlatformBackend;
    use crate::device::{DeviceDescriptor, DeviceId, OpenHandle};
    use crate::event::{EventMask, HotplugFlags};
    use crate::filter::MATCH_ANY;
    use crate::HotplugRegistration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct CountingBackend {
        disconnects: AtomicUsize,
    }

    impl PlatformBackend for CountingBackend {
        fn has_hotplug(&self) -> bool {
            true
        }

        fn handle_disconnect(&self, _handle: &OpenHandle) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn device(id: u64, vid: u16) -> Arc<UsbDevice> {
        Arc::new(UsbDevice::new(
            DeviceId(id),
            1,
            id as u8,
            DeviceDescriptor::new(vid, 0x5005, 0),
        ))
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&c), c)
    }

    #[test]
    fn test_notify_invokes_matching() {
        let ctx = HotplugContext::new(Arc::new(CountingBackend::default()));
        let (calls, c) = counter();
        ctx.register_callback(EventMask::ARRIVED, HotplugFlags::NONE, 0x045A, MATCH_ANY, MATCH_ANY, move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
            false
        })
        .unwrap();

        let summary = ctx.notify(&device(1, 0x045A), HotplugEvent::Arrived);
        assert_eq!(summary.invoked, 1);
        ctx.notify(&device(2, 0x045B), HotplugEvent::Arrived);
        ctx.notify(&device(1, 0x045A), HotplugEvent::Left);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deregister_return_is_one_shot() {
        let ctx = HotplugContext::new(Arc::new(CountingBackend::default()));
        let (calls, c) = counter();
        let handle = ctx
            .register(HotplugRegistration::new(EventMask::ALL).callback(move |_, _, _| {
                c.fetch_add(1, Ordering::SeqCst);
                CallbackAction::Deregister
            }))
            .unwrap();

        let summary = ctx.notify(&device(1, 0x045A), HotplugEvent::Arrived);
        assert_eq!(summary, DispatchSummary { invoked: 1, released: 1, disconnected: 0 });
        ctx.notify(&device(1, 0x045A), HotplugEvent::Arrived);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!ctx.callbacks().contains(handle));
    }

    #[test]
    fn test_pending_record_released_by_next_pass() {
        let ctx = HotplugContext::new(Arc::new(CountingBackend::default()));
        let (calls, c) = counter();
        let handle = ctx
            .register(HotplugRegistration::new(EventMask::ALL).callback(move |_, _, _| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            }))
            .unwrap();

        ctx.deregister(handle);
        assert!(ctx.callbacks().contains(handle));

        let summary = ctx.notify(&device(1, 0x045A), HotplugEvent::Arrived);
        assert_eq!(summary.invoked, 0);
        assert_eq!(summary.released, 1);
        assert!(!ctx.callbacks().contains(handle));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_self_deregister_while_running_releases_on_commit() {
        let ctx = HotplugContext::new(Arc::new(CountingBackend::default()));
        let own = Arc::new(std::sync::Mutex::new(None::<CallbackHandle>));
        let slot = Arc::clone(&own);

        let handle = ctx
            .register(HotplugRegistration::new(EventMask::ALL).callback(move |ctx, _, _| {
                if let Some(h) = *slot.lock().unwrap() {
                    ctx.deregister(h);
                }
                false
            }))
            .unwrap();
        *own.lock().unwrap() = Some(handle);

        let summary = ctx.notify(&device(1, 0x045A), HotplugEvent::Arrived);
        assert_eq!(summary.invoked, 1);
        assert_eq!(summary.released, 1);
        assert!(ctx.callbacks().is_empty());
    }

    #[test]
    fn test_left_disconnects_open_handles_once() {
        let backend = Arc::new(CountingBackend::default());
        let ctx = HotplugContext::new(Arc::clone(&backend) as Arc<dyn PlatformBackend>);
        let dev = device(1, 0x045A);
        let other = device(2, 0x045A);
        ctx.open_handles().open(Arc::clone(&dev));
        ctx.open_handles().open(Arc::clone(&dev));
        let untouched = ctx.open_handles().open(Arc::clone(&other));

        let summary = ctx.device_left(&dev);
        assert_eq!(summary.disconnected, 2);
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 2);

        // A repeated departure does not notify the same handles again.
        let summary = ctx.device_left(&dev);
        assert_eq!(summary.disconnected, 0);
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 2);
        assert!(!untouched.is_disconnected());
    }

    #[test]
    fn test_arrival_does_not_disconnect() {
        let backend = Arc::new(CountingBackend::default());
        let ctx = HotplugContext::new(Arc::clone(&backend) as Arc<dyn PlatformBackend>);
        let dev = device(1, 0x045A);
        let handle = ctx.open_handles().open(Arc::clone(&dev));

        ctx.notify(&dev, HotplugEvent::Arrived);
        assert!(!handle.is_disconnected());
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 0);
    }
}
