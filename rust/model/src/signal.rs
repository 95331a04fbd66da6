// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Change notifications for composite entities.
//!
//! Observers subscribe with a callback and receive [`SignalEvent`]s when an
//! opening is added to or removed from a slab. Inside a transaction events
//! are queued and delivered once the transaction commits, or after an undo or
//! redo batch has been fully applied; an abort discards them.

use crate::keys::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    OpeningAdded,
    OpeningRemoved,
}

/// A single notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    pub kind: SignalKind,
    /// The composite that changed.
    pub host: EntityKey,
    /// The entity that was added or removed.
    pub entity: EntityKey,
}

/// Handle returned by [`Signals::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&SignalEvent)>;

/// Subscriber list plus the queue of events awaiting delivery.
#[derive(Default)]
pub struct Signals {
    subscribers: Vec<(SubscriptionId, Callback)>,
    pending: Vec<SignalEvent>,
    next_id: u64,
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signals")
            .field("subscribers", &self.subscribers.len())
            .field("pending", &self.pending)
            .finish()
    }
}

impl Signals {
    pub fn subscribe(&mut self, callback: impl FnMut(&SignalEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Events waiting for the current transaction or replay batch to finish.
    pub fn pending(&self) -> &[SignalEvent] {
        &self.pending
    }

    pub(crate) fn emit(&mut self, event: SignalEvent) {
        for (_, callback) in &mut self.subscribers {
            callback(&event);
        }
    }

    pub(crate) fn queue(&mut self, event: SignalEvent) {
        self.pending.push(event);
    }

    /// Delivers and clears the queue.
    pub(crate) fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "delivering queued signals");
        }
        for event in pending {
            self.emit(event);
        }
    }

    pub(crate) fn discard(&mut self) {
        self.pending.clear();
    }
}
