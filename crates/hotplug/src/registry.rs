//! Per-context callback registry
//!
//! All record state lives behind one mutex. Dispatch never holds that mutex
//! while a callback runs: it takes a copy of the live handles, then resolves
//! each handle in a short locked "decide" step, invokes the callback unlocked,
//! and applies the outcome in a locked "commit" step. Records removed by other
//! threads in between simply resolve to [`Decision::Gone`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::device::UsbDevice;
use crate::error::HotplugError;
use crate::event::{EventMask, HotplugEvent};
use crate::filter::{self, DeviceFilter};
use crate::lock;
use crate::record::{
    CallbackAction, CallbackHandle, CallbackRecord, ContextId, Lifecycle, SharedCallback,
};

/// Outcome of the locked decide step for one record
pub enum Decision {
    /// Record no longer exists (removed by another pass or teardown)
    Gone,
    /// Record was pending removal and has now been released
    Released,
    /// Record does not match this device/event and stays armed
    Skip,
    /// Record matches; invoke this callback without holding the lock
    Invoke(SharedCallback),
}

/// Handles captured at the start of a dispatch pass
///
/// Insertions after the snapshot are not visited by this pass; removals are
/// observed when the handle is resolved.
#[derive(Debug)]
pub struct DispatchCursor {
    handles: std::vec::IntoIter<CallbackHandle>,
}

impl Iterator for DispatchCursor {
    type Item = CallbackHandle;

    fn next(&mut self) -> Option<Self::Item> {
        self.handles.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.handles.size_hint()
    }
}

/// Mutex-guarded collection of callback records
#[derive(Debug)]
pub struct CallbackRegistry {
    records: Mutex<HashMap<CallbackHandle, CallbackRecord>>,
    max_callbacks: Option<usize>,
}

impl CallbackRegistry {
    /// Create an unbounded registry
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    /// Create a registry that refuses registrations beyond `max_callbacks`
    pub fn with_capacity_limit(max_callbacks: Option<usize>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_callbacks,
        }
    }

    /// Allocate and insert a new active record, returning its fresh handle
    ///
    /// Fails with [`HotplugError::NoMem`] if space cannot be reserved or the
    /// capacity limit is reached; the registry is unchanged in that case.
    pub fn insert(
        &self,
        owner: ContextId,
        events: EventMask,
        filter: DeviceFilter,
        callback: SharedCallback,
    ) -> Result<CallbackHandle, HotplugError> {
        let mut records = lock(&self.records);

        if self.max_callbacks.is_some_and(|max| records.len() >= max) {
            return Err(HotplugError::NoMem);
        }
        records.try_reserve(1).map_err(|_| HotplugError::NoMem)?;

        let record = CallbackRecord::new(owner, events, filter, callback);
        let handle = record.handle;
        records.insert(handle, record);
        trace!("Inserted {} ({} live)", handle, records.len());

        Ok(handle)
    }

    /// Copy the live handles for a dispatch pass
    pub fn snapshot_for_dispatch(&self) -> DispatchCursor {
        let handles: Vec<_> = lock(&self.records).keys().copied().collect();
        DispatchCursor {
            handles: handles.into_iter(),
        }
    }

    /// Locked decide step: release pending records, evaluate the filter,
    /// and hand back the callback to invoke on a match
    pub fn decide(&self, handle: CallbackHandle, device: &UsbDevice, event: HotplugEvent) -> Decision {
        let mut records = lock(&self.records);
        let Some(record) = records.get(&handle) else {
            return Decision::Gone;
        };

        if record.lifecycle == Lifecycle::PendingFree {
            let released = Self::unlink(&mut records, handle);
            // Captured callback state may run arbitrary Drop code.
            drop(records);
            drop(released);
            return Decision::Released;
        }

        if !filter::matches(record.events, &record.filter, device, event) {
            return Decision::Skip;
        }

        Decision::Invoke(Arc::clone(&record.callback))
    }

    /// Locked commit step after an invocation
    ///
    /// Removes the record if the callback asked to be deregistered or the
    /// record was marked pending while the callback ran. Returns true if the
    /// record was released.
    pub fn commit(&self, handle: CallbackHandle, action: CallbackAction) -> bool {
        let mut records = lock(&self.records);
        let release = match records.get(&handle) {
            Some(record) => {
                action == CallbackAction::Deregister || record.lifecycle == Lifecycle::PendingFree
            }
            None => return false,
        };
        if !release {
            return false;
        }

        let released = Self::unlink(&mut records, handle);
        drop(records);
        released.is_some()
    }

    /// Mark a record for lazy removal
    ///
    /// Unknown handles are ignored. Returns true if a live record was found.
    pub fn mark_pending_free(&self, handle: CallbackHandle) -> bool {
        let mut records = lock(&self.records);
        match records.get_mut(&handle) {
            Some(record) => {
                record.lifecycle = Lifecycle::PendingFree;
                trace!("Marked {} pending free", handle);
                true
            }
            None => false,
        }
    }

    /// Remove every record without invoking any of them
    ///
    /// Returns the number of records removed. Calling it again is a no-op.
    pub fn teardown(&self) -> usize {
        let drained = std::mem::take(&mut *lock(&self.records));
        let count = drained.len();
        drop(drained);
        count
    }

    /// Lifecycle of a live record, or `None` once removed
    pub fn lifecycle(&self, handle: CallbackHandle) -> Option<Lifecycle> {
        lock(&self.records).get(&handle).map(|r| r.lifecycle)
    }

    pub fn contains(&self, handle: CallbackHandle) -> bool {
        lock(&self.records).contains_key(&handle)
    }

    /// Number of live records, including those pending removal
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unlink a record; callers hold the lock and drop the result after
    /// releasing it
    fn unlink(
        records: &mut HashMap<CallbackHandle, CallbackRecord>,
        handle: CallbackHandle,
    ) -> Option<CallbackRecord> {
        let record = records.remove(&handle);
        if record.is_some() {
            trace!("Released {} ({} live)", handle, records.len());
        }
        record
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
