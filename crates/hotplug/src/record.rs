//! Callback records and their identifiers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::HotplugContext;
use crate::device::UsbDevice;
use crate::event::{EventMask, HotplugEvent};
use crate::filter::DeviceFilter;

/// Opaque token identifying a callback registration
///
/// Handles come from a process-wide counter, so they are unique across all
/// contexts and never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u64);

static NEXT_CALLBACK_HANDLE: AtomicU64 = AtomicU64::new(1);

impl CallbackHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_CALLBACK_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// Identifier of a hotplug context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// What a callback wants after being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackAction {
    /// Keep the callback armed for further events
    #[default]
    Rearm,
    /// Deregister the callback now
    Deregister,
}

impl From<bool> for CallbackAction {
    /// `true` means "deregister me"
    fn from(done: bool) -> Self {
        if done {
            Self::Deregister
        } else {
            Self::Rearm
        }
    }
}

/// Shared callback stored in a record and cloned out for unlocked invocation
pub type SharedCallback =
    Arc<dyn Fn(&HotplugContext, &UsbDevice, HotplugEvent) -> CallbackAction + Send + Sync>;

/// Lifecycle of a registered callback
///
/// Removal from the registry is the terminal state and is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Deregistered; removed by the next dispatch pass or teardown,
    /// never invoked again
    PendingFree,
}

/// One registration held by a callback registry
pub struct CallbackRecord {
    pub(crate) handle: CallbackHandle,
    pub(crate) owner: ContextId,
    pub(crate) events: EventMask,
    pub(crate) filter: DeviceFilter,
    pub(crate) callback: SharedCallback,
    pub(crate) lifecycle: Lifecycle,
}

impl CallbackRecord {
    pub(crate) fn new(
        owner: ContextId,
        events: EventMask,
        filter: DeviceFilter,
        callback: SharedCallback,
    ) -> Self {
        Self {
            handle: CallbackHandle::next(),
            owner,
            events,
            filter,
            callback,
            lifecycle: Lifecycle::Active,
        }
    }

    pub fn handle(&self) -> CallbackHandle {
        self.handle
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn events(&self) -> EventMask {
        self.events
    }

    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }
}

impl fmt::Debug for CallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRecord")
            .field("handle", &self.handle)
            .field("owner", &self.owner)
            .field("events", &self.events)
            .field("filter", &self.filter)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_increasing() {
        let a = CallbackHandle::next();
        let b = CallbackHandle::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_action_from_bool() {
        assert_eq!(CallbackAction::from(true), CallbackAction::Deregister);
        assert_eq!(CallbackAction::from(false), CallbackAction::Rearm);
    }
}
