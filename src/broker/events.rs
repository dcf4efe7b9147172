//! Broker event reporting
//!
//! Non-fatal delivery problems are never returned to the publisher. They are
//! logged here and, when someone asked for them, forwarded on an unbounded
//! channel so operators and tests can observe drops and discards.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::subscription::ClientId;

/// Why a message did not reach one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The delivery channel had no free slot.
    Full,
    /// No slot freed up within the configured delivery timeout.
    Timeout,
    /// The receiving half was dropped.
    Closed,
    /// The subscriber unsubscribed while the message was in flight.
    Revoked,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Full => "channel full",
            DropReason::Timeout => "delivery timed out",
            DropReason::Closed => "channel closed",
            DropReason::Revoked => "subscription revoked",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    DeliveryDropped {
        topic: String,
        client_id: ClientId,
        message_id: Uuid,
        reason: DropReason,
    },
    /// Pending messages thrown away when a topic shut down.
    MessagesDiscarded { topic: String, count: usize },
}

#[derive(Debug, Clone, Default)]
pub struct EventReporter {
    sink: Option<mpsc::UnboundedSender<BrokerEvent>>,
}

impl EventReporter {
    /// A reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter that logs and forwards every event to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sink: Some(tx) }, rx)
    }

    pub fn report(&self, event: BrokerEvent) {
        match &event {
            BrokerEvent::DeliveryDropped {
                topic,
                client_id,
                message_id,
                reason: DropReason::Revoked,
            } => {
                debug!(%topic, %client_id, %message_id, "delivery skipped for revoked subscription");
            }
            BrokerEvent::DeliveryDropped {
                topic,
                client_id,
                message_id,
                reason,
            } => {
                warn!(%topic, %client_id, %message_id, %reason, "delivery dropped");
            }
            BrokerEvent::MessagesDiscarded { topic, count } => {
                warn!(%topic, count, "discarded undelivered messages on shutdown");
            }
        }

        if let Some(sink) = &self.sink {
            // receiver gone means nobody is listening any more
            let _ = sink.send(event);
        }
    }
}
