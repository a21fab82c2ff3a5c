//! Pending-request registry
//!
//! Maps outstanding request ids to single-use completion slots. The dispatch
//! thread resolves slots as replies arrive; callers block on the receiving
//! half. Once the registry is closed every remaining slot is failed and new
//! registrations are refused, so no caller can wait on a dead connection.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::error::SessionError;

pub(crate) type Reply = Result<Value, SessionError>;

/// Receiving half handed to the caller of [`PendingRequests::register`]
pub(crate) type ReplySlot = Receiver<Reply>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    slots: HashMap<String, SyncSender<Reply>>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh request id without registering a slot.
    /// Ids are never reused for the lifetime of the registry.
    pub fn next_id(&self) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        inner.next_id.to_string()
    }

    /// Allocate an id and register a slot for it
    pub fn register(&self) -> Result<(String, ReplySlot), SessionError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SessionError::ConnectionClosed);
        }
        inner.next_id += 1;
        let id = inner.next_id.to_string();
        let (tx, rx) = mpsc::sync_channel(1);
        inner.slots.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Resolve and remove the slot for `id`. Returns false if no such slot
    /// exists (never registered, already resolved, or cancelled).
    pub fn complete(&self, id: &str, reply: Reply) -> bool {
        let slot = self.lock().slots.remove(id);
        match slot {
            Some(tx) => {
                // The caller may have given up; that is not our problem
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove the slot for `id` without resolving it
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().slots.remove(id).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().slots.contains_key(id)
    }

    /// Refuse further registrations and fail everything still pending
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.slots.drain().collect()
        };
        let count = drained.len();
        for (id, tx) in drained {
            debug!(%id, "failing pending request, connection closed");
            let _ = tx.send(Err(SessionError::ConnectionClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }
}
