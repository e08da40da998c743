//! Pending-reply bookkeeping.
//!
//! Every asynchronous request leaves a [`Continuation`] keyed by the
//! [`MessageId`] its answer will carry. The poll loop claims the entry when
//! that identifier arrives; claiming removes it, so each continuation fires
//! at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thinbus_message::{MessageId, Signature};
use tracing::{trace, warn};

use crate::completion::CallbackId;

/// What to do when the awaited message arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    /// Report a discovered advertised name.
    FoundAdvertisedName { callback: CallbackId },
    /// Finish a join-session request for `name`.
    JoinSession { callback: CallbackId, name: String },
    /// Decode a method reply using `out_signature`.
    MethodReply {
        callback: CallbackId,
        out_signature: Option<Signature>,
    },
    /// Report one occurrence of a signal or inbound call.
    Listener { callback: CallbackId },
}

impl Continuation {
    pub fn callback(&self) -> CallbackId {
        match self {
            Continuation::FoundAdvertisedName { callback }
            | Continuation::JoinSession { callback, .. }
            | Continuation::MethodReply { callback, .. }
            | Continuation::Listener { callback } => *callback,
        }
    }

    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Continuation::FoundAdvertisedName { .. } => "found_advertised_name",
            Continuation::JoinSession { .. } => "join_session",
            Continuation::MethodReply { .. } => "method_reply",
            Continuation::Listener { .. } => "listener",
        }
    }
}

/// Map of identifiers to pending continuations.
///
/// Shared by request callers and the poll loop. Lookup and removal happen
/// under one lock, so two racing claims for an identifier cannot both win.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    entries: Mutex<HashMap<MessageId, Continuation>>,
    collisions: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<MessageId, Continuation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `continuation` for `id`.
    ///
    /// An existing entry is replaced and returned; the replaced caller will
    /// never be answered, so the event is logged and counted.
    pub fn register(&self, id: MessageId, continuation: Continuation) -> Option<Continuation> {
        let callback = continuation.callback();
        let displaced = self.entries().insert(id, continuation);
        match &displaced {
            Some(previous) => {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                warn!(
                    msg_id = %id,
                    displaced = %previous.callback(),
                    by = %callback,
                    "handler collision, earlier request will not be answered"
                );
            }
            None => trace!(msg_id = %id, %callback, "handler registered"),
        }
        displaced
    }

    /// Claim the continuation for `id`, removing it.
    pub fn take_and_remove(&self, id: MessageId) -> Option<Continuation> {
        self.entries().remove(&id)
    }

    /// Undo a registration whose request never went out: remove the entry
    /// for `id` and reinstate the one it displaced, if any.
    pub fn withdraw(&self, id: MessageId, displaced: Option<Continuation>) -> Option<Continuation> {
        let mut entries = self.entries();
        let withdrawn = entries.remove(&id);
        if let Some(previous) = displaced {
            entries.insert(id, previous);
        }
        trace!(msg_id = %id, "handler withdrawn");
        withdrawn
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Identifiers with a pending continuation, in ascending order.
    pub fn pending(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.entries().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registrations that displaced a pending entry.
    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    /// Drop every pending continuation.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}
