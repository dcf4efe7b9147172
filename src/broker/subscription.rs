//! Subscription management
//!
//! A `SubscriptionTable` maps client ids to their delivery channel for one
//! topic. The dispatcher never iterates the table under its lock; it works on
//! a [`snapshot`](SubscriptionTable::snapshot) instead.
//!
//! Every `Subscription` carries a liveness guard shared by all of its clones.
//! A delivery only lands while the guard is held and still live, and
//! `revoke` flips it under the same guard, so once `revoke` returns no further
//! message can reach that channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Permit};

use crate::broker::message::Message;

pub type ClientId = String;

/// Receiving half of a subscription's bounded delivery channel.
pub type Delivery = mpsc::Receiver<Arc<Message>>;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: ClientId,
    pub topic: String,
    sender: mpsc::Sender<Arc<Message>>,
    live: Arc<Mutex<bool>>,
}

impl Subscription {
    /// Creates a live subscription with a channel of `buffer` slots.
    pub fn new(client_id: ClientId, topic: &str, buffer: usize) -> (Self, Delivery) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let subscription = Self {
            client_id,
            topic: topic.to_string(),
            sender,
            live: Arc::new(Mutex::new(true)),
        };
        (subscription, receiver)
    }

    pub fn sender(&self) -> &mpsc::Sender<Arc<Message>> {
        &self.sender
    }

    /// True when a delivery attempt would not find the channel full. A
    /// closed channel counts, so the attempt can notice and drop it.
    pub fn has_room(&self) -> bool {
        self.sender.capacity() > 0 || self.sender.is_closed()
    }

    pub fn is_live(&self) -> bool {
        *self.live.lock()
    }

    /// Marks the subscription dead. Blocks only for as long as an in-flight
    /// `send_if_live` holds the guard.
    pub fn revoke(&self) {
        *self.live.lock() = false;
    }

    /// Sends through a reserved slot if the subscription is still live.
    /// Returns `false` (releasing the slot) when it has been revoked.
    pub fn send_if_live(&self, permit: Permit<'_, Arc<Message>>, message: Arc<Message>) -> bool {
        let live = self.live.lock();
        if *live {
            permit.send(message);
            true
        } else {
            false
        }
    }

    /// True when both handles belong to the same `subscribe` call.
    pub fn is_same(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<ClientId, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `subscription`, returning the entry it replaced, if any.
    pub fn add(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.entries
            .insert(subscription.client_id.clone(), subscription)
    }

    pub fn remove(&mut self, client_id: &str) -> Option<Subscription> {
        self.entries.remove(client_id)
    }

    /// Removes the entry for `subscription.client_id` only if it has not been
    /// replaced by a newer subscription since.
    pub fn remove_if_same(&mut self, subscription: &Subscription) -> bool {
        match self.entries.get(&subscription.client_id) {
            Some(current) if current.is_same(subscription) => {
                self.entries.remove(&subscription.client_id);
                true
            }
            _ => false,
        }
    }

    /// Owned copy of the current subscriptions.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.values().cloned().collect()
    }

    /// True when at least one subscriber can take a message right now.
    pub fn any_has_room(&self) -> bool {
        self.entries.values().any(Subscription::has_room)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.entries.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry, returning them so the caller can revoke them.
    pub fn clear(&mut self) -> Vec<Subscription> {
        self.entries.drain().map(|(_, subscription)| subscription).collect()
    }
}
