//! Topic management
//!
//! A `Topic` binds one priority queue and one subscription table under a name
//! and runs exactly one dispatcher task for them.
//!
//! Concurrency notes:
//! - the queue, the sequence counter and the stopped flag share one lock;
//!   publishers only ever take this one
//! - the subscription table has its own lock so subscribe/unsubscribe never
//!   wait behind a publisher or behind delivery
//! - `subscribe` is the only path that nests them (table, then queue state);
//!   nothing takes them in the opposite order
//! - the work signal is a `Notify`; its stored permit covers a publish that
//!   lands between the dispatcher's empty check and its wait

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, trace};

use crate::broker::dispatcher::{self, DispatcherState};
use crate::broker::events::{BrokerEvent, EventReporter};
use crate::broker::message::{Message, Priority};
use crate::broker::queue::PriorityQueue;
use crate::broker::subscription::{ClientId, Delivery, Subscription, SubscriptionTable};
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;

/// Per-topic policy values, taken from [`BrokerSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub queue_capacity: Option<usize>,
    pub delivery_buffer: usize,
    pub delivery_timeout: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for TopicConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity(),
            delivery_buffer: settings.delivery_buffer(),
            delivery_timeout: settings.delivery_timeout(),
        }
    }
}

#[derive(Debug)]
struct QueueState {
    queue: PriorityQueue,
    next_sequence: u64,
    stopped: bool,
}

/// What the dispatcher should do next.
#[derive(Debug)]
pub(crate) enum NextMessage {
    Ready(Message),
    Idle,
    /// Messages are pending but no subscriber has a free slot.
    Blocked,
    Stopped,
}

#[derive(Debug, Default)]
struct TopicStats {
    published: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of a topic's counters.
///
/// `delivered` and `dropped` count individual subscriber deliveries, so one
/// dispatched message can add to both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub dispatched: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    config: TopicConfig,
    state: Mutex<QueueState>,
    subscriptions: Mutex<SubscriptionTable>,
    work: Notify,
    dispatcher: watch::Sender<DispatcherState>,
    stats: TopicStats,
    reporter: EventReporter,
}

impl Topic {
    /// Creates the topic and spawns its dispatcher on the current Tokio
    /// runtime.
    pub fn spawn(name: &str, config: TopicConfig, reporter: EventReporter) -> Arc<Self> {
        let topic = Arc::new(Self::new(name, config, reporter));
        tokio::spawn(dispatcher::run(Arc::clone(&topic)));
        topic
    }

    /// Creates the topic without a dispatcher.
    pub(crate) fn new(name: &str, config: TopicConfig, reporter: EventReporter) -> Self {
        let (dispatcher, _) = watch::channel(DispatcherState::Idle);
        Self {
            name: name.to_string(),
            state: Mutex::new(QueueState {
                queue: PriorityQueue::with_capacity(config.queue_capacity),
                next_sequence: 0,
                stopped: false,
            }),
            config,
            subscriptions: Mutex::new(SubscriptionTable::new()),
            work: Notify::new(),
            dispatcher,
            stats: TopicStats::default(),
            reporter,
        }
    }

    /// Queues a message and wakes the dispatcher.
    ///
    /// Returns the created message. Fails with [`BrokerError::Queue`] when the
    /// queue is at capacity and [`BrokerError::TopicClosed`] after shutdown.
    pub fn publish(
        &self,
        content: impl Into<String>,
        priority: Priority,
    ) -> Result<Message, BrokerError> {
        let message = {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(BrokerError::TopicClosed(self.name.clone()));
            }
            let message = Message::new(&self.name, content.into(), priority, state.next_sequence);
            state.queue.push(message.clone())?;
            state.next_sequence += 1;
            message
        };

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.work.notify_one();
        trace!(topic = %self.name, message_id = %message.id, priority, "message queued");
        Ok(message)
    }

    /// Registers `client_id`, replacing (and revoking) any earlier
    /// subscription it had on this topic.
    pub fn subscribe(&self, client_id: impl Into<ClientId>) -> Result<Delivery, BrokerError> {
        let (subscription, delivery) =
            Subscription::new(client_id.into(), &self.name, self.config.delivery_buffer);
        let client_id = subscription.client_id.clone();

        let replaced = {
            let mut table = self.subscriptions.lock();
            if self.state.lock().stopped {
                return Err(BrokerError::TopicClosed(self.name.clone()));
            }
            table.add(subscription)
        };

        if let Some(previous) = replaced {
            previous.revoke();
            debug!(topic = %self.name, %client_id, "replaced existing subscription");
        }
        // pending messages may have been waiting for a first subscriber
        self.work.notify_one();
        debug!(topic = %self.name, %client_id, "subscribed");
        Ok(delivery)
    }

    /// Removes `client_id`'s subscription. Returns `false` if it had none.
    ///
    /// Messages already sitting in the delivery channel can still be drained
    /// by the receiver; nothing new is written once this returns.
    pub fn unsubscribe(&self, client_id: &str) -> bool {
        let removed = self.subscriptions.lock().remove(client_id);
        match removed {
            Some(subscription) => {
                subscription.revoke();
                // the dispatcher may be waiting on this channel's capacity
                self.work.notify_one();
                debug!(topic = %self.name, %client_id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Stops the dispatcher at its next loop boundary and discards pending
    /// messages. Returns how many were discarded; later calls return 0.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            if state.stopped {
                return 0;
            }
            state.stopped = true;
            state.queue.drain().len()
        };

        let subscriptions = self.subscriptions.lock().clear();
        for subscription in &subscriptions {
            subscription.revoke();
        }
        self.work.notify_one();

        if discarded > 0 {
            self.reporter.report(BrokerEvent::MessagesDiscarded {
                topic: self.name.clone(),
                count: discarded,
            });
        }
        info!(topic = %self.name, discarded, "topic shut down");
        discarded
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of messages waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscriptions.lock().contains(client_id)
    }

    pub fn state(&self) -> DispatcherState {
        *self.dispatcher.borrow()
    }

    /// Receiver that observes dispatcher state transitions.
    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.dispatcher.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.stats.published.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    // Dispatcher-facing helpers.

    /// Pops the next message, unless the topic is stopped, empty, has nobody
    /// to deliver to, or every subscriber's channel is full.
    pub(crate) fn next_message(&self) -> NextMessage {
        let (has_subscribers, has_room) = {
            let table = self.subscriptions.lock();
            (!table.is_empty(), table.any_has_room())
        };
        let mut state = self.state.lock();
        if state.stopped {
            return NextMessage::Stopped;
        }
        if !has_subscribers || state.queue.is_empty() {
            return NextMessage::Idle;
        }
        if !has_room {
            return NextMessage::Blocked;
        }
        match state.queue.pop() {
            Ok(message) => NextMessage::Ready(message),
            Err(_) => NextMessage::Idle,
        }
    }

    pub(crate) async fn work_available(&self) {
        self.work.notified().await;
    }

    pub(crate) fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.lock().snapshot()
    }

    /// Drops a subscription whose receiver has gone away.
    pub(crate) fn forget(&self, subscription: &Subscription) {
        if self.subscriptions.lock().remove_if_same(subscription) {
            subscription.revoke();
            debug!(topic = %self.name, client_id = %subscription.client_id, "removed closed subscription");
        }
    }

    pub(crate) fn set_state(&self, next: DispatcherState) {
        self.dispatcher.send_if_modified(|current| {
            if *current == next || *current == DispatcherState::Stopped {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub(crate) fn reporter(&self) -> &EventReporter {
        &self.reporter
    }

    pub(crate) fn record_dispatch(&self, delivered: u64, dropped: u64) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        self.stats.delivered.fetch_add(delivered, Ordering::Relaxed);
        self.stats.dropped.fetch_add(dropped, Ordering::Relaxed);
    }
}
