//! Per-topic priority queue
//!
//! A binary min-heap over `(priority, sequence)`. `std`'s `BinaryHeap` is a
//! max-heap and is not stable, so entries are wrapped in `Reverse` and ordered
//! only by their dispatch key; equal priorities come out in sequence order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::broker::message::Message;
use crate::utils::error::QueueError;

/// Heap entry ordered by the message's dispatch key alone.
#[derive(Debug)]
struct Pending(Message);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.dispatch_key() == other.0.dispatch_key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.dispatch_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Reverse<Pending>>,
    capacity: Option<usize>,
}

impl PriorityQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that rejects pushes once `capacity` messages are
    /// pending. `None` means unbounded.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
        }
    }

    pub fn push(&mut self, message: Message) -> Result<(), QueueError> {
        if let Some(capacity) = self.capacity {
            if self.heap.len() >= capacity {
                return Err(QueueError::Full(capacity));
            }
        }
        self.heap.push(Reverse(Pending(message)));
        Ok(())
    }

    /// Removes the message with the smallest `(priority, sequence)`.
    pub fn pop(&mut self) -> Result<Message, QueueError> {
        self.heap
            .pop()
            .map(|Reverse(Pending(message))| message)
            .ok_or(QueueError::Empty)
    }

    pub fn peek(&self) -> Option<&Message> {
        self.heap.peek().map(|Reverse(Pending(message))| message)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Empties the queue, returning the removed messages in no particular
    /// order.
    pub fn drain(&mut self) -> Vec<Message> {
        self.heap
            .drain()
            .map(|Reverse(Pending(message))| message)
            .collect()
    }
}
