//! Message definitions for the broker
//!
//! `Message` is the immutable unit the dispatch engine moves around. It is
//! built by [`Topic::publish`](crate::broker::topic::Topic::publish), owned by
//! the topic's priority queue until popped, and then shared (`Arc<Message>`)
//! by every subscriber it is delivered to.
//!
//! Notes on fields:
//! - `id`: unique identifier, generated by the broker
//! - `priority`: **lower value = higher priority**; `0` outranks `5`, and
//!   negative values outrank both
//! - `sequence`: per-topic arrival counter, only used to break priority ties
//! - `timestamp`: milliseconds since UNIX epoch at publish time, informational

use std::cmp::Ordering;

use uuid::Uuid;

/// Message priority. Lower values are dispatched first.
pub type Priority = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub content: String,
    pub priority: Priority,
    pub sequence: u64,
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: &str, content: String, priority: Priority, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            content,
            priority,
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Dispatch order key: `(priority, sequence)` ascending.
    pub fn dispatch_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }

    /// Compares two messages by dispatch order. `Less` means `self` goes out
    /// first.
    pub fn dispatch_cmp(&self, other: &Self) -> Ordering {
        self.dispatch_key().cmp(&other.dispatch_key())
    }
}
