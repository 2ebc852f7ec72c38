// Pending-request table: the id -> waiter map routing inbound responses.
//
// Written by every sender (insert on send start, remove on failure paths)
// and by the single receive loop (remove on dispatch), so all operations go
// through a concurrent map with atomic insert-if-absent.

use crate::client::error::{FbmError, FbmResult};
use crate::client::waiter::ResponseWaiter;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PendingTable {
    inner: DashMap<i32, Arc<ResponseWaiter>>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            inner: DashMap::new(),
        }
    }

    /// Registers a waiter under `id`, failing with `DuplicateMessageId` when
    /// the id is already in flight.
    pub fn insert_unique(&self, id: i32, waiter: Arc<ResponseWaiter>) -> FbmResult<()> {
        match self.inner.entry(id) {
            Entry::Occupied(_) => Err(FbmError::DuplicateMessageId(id)),
            Entry::Vacant(slot) => {
                slot.insert(waiter);
                Ok(())
            }
        }
    }

    /// Removes and returns the waiter registered under `id`, if any.
    pub fn remove(&self, id: i32) -> Option<Arc<ResponseWaiter>> {
        self.inner.remove(&id).map(|(_, waiter)| waiter)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.inner.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// A point-in-time copy of the registered waiters.
    pub fn snapshot(&self) -> Vec<Arc<ResponseWaiter>> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Cancels every pending waiter and empties the table. Used by the
    /// receive loop's shutdown fan-out.
    pub fn cancel_all(&self) {
        for waiter in self.snapshot() {
            waiter.manual_cancellation();
        }
        self.inner.clear();
    }
}
