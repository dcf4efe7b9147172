//! Topic dispatcher
//!
//! One task per topic pops messages in `(priority, sequence)` order and fans
//! each out to a snapshot of the topic's subscribers.
//!
//! ```text
//! Idle --work signal--> Dispatching --queue drained--> Idle
//!   \______________________ shutdown ______________________\--> Stopped
//! ```
//!
//! A message is only popped while at least one subscriber has a free slot,
//! so a backlog drains at the pace of its fastest subscriber instead of
//! overflowing the channels.
//!
//! Delivery is at-most-once and best-effort. Each attempt first tries to grab
//! a channel slot without waiting; if the channel is full and the topic has a
//! delivery timeout, it waits at most that long. Attempts for different
//! subscribers run concurrently, so a stuck subscriber only ever loses its
//! own copy of a message.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, select_all};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::broker::events::{BrokerEvent, DropReason};
use crate::broker::message::Message;
use crate::broker::subscription::Subscription;
use crate::broker::topic::{NextMessage, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Nothing to deliver, nobody to deliver to, or every subscriber's
    /// channel is full.
    Idle,
    Dispatching,
    /// Terminal.
    Stopped,
}

/// Dispatch loop for one topic. Returns once the topic is shut down.
pub(crate) async fn run(topic: Arc<Topic>) {
    debug!(topic = %topic.name, "dispatcher started");

    loop {
        match topic.next_message() {
            NextMessage::Ready(message) => {
                topic.set_state(DispatcherState::Dispatching);
                fan_out(&topic, Arc::new(message)).await;
            }
            NextMessage::Idle => {
                topic.set_state(DispatcherState::Idle);
                topic.work_available().await;
            }
            NextMessage::Blocked => {
                topic.set_state(DispatcherState::Idle);
                wait_for_room(&topic).await;
            }
            NextMessage::Stopped => break,
        }
    }

    topic.set_state(DispatcherState::Stopped);
    debug!(topic = %topic.name, "dispatcher stopped");
}

/// Waits until some subscriber frees a slot (or closes), or until the topic
/// signals new work such as a subscribe, unsubscribe or shutdown.
async fn wait_for_room(topic: &Topic) {
    let subscribers = topic.snapshot();
    if subscribers.is_empty() {
        return;
    }

    let slots = subscribers
        .iter()
        .map(|subscription| Box::pin(subscription.sender().reserve()));

    tokio::select! {
        // the reserved slot is released again when dropped
        _ = select_all(slots) => {}
        _ = topic.work_available() => {}
    }
}

/// Offers `message` to every current subscriber of `topic`.
pub(crate) async fn fan_out(topic: &Topic, message: Arc<Message>) {
    let subscribers = topic.snapshot();
    let wait = topic.config().delivery_timeout;

    let outcomes = join_all(
        subscribers
            .iter()
            .map(|subscription| deliver(subscription, &message, wait)),
    )
    .await;

    let mut delivered = 0;
    let mut dropped = 0;
    for (subscription, outcome) in subscribers.iter().zip(outcomes) {
        let reason = match outcome {
            Ok(()) => {
                delivered += 1;
                continue;
            }
            Err(reason) => reason,
        };

        match reason {
            DropReason::Revoked => {}
            DropReason::Closed => {
                dropped += 1;
                topic.forget(subscription);
            }
            DropReason::Full | DropReason::Timeout => dropped += 1,
        }

        topic.reporter().report(BrokerEvent::DeliveryDropped {
            topic: subscription.topic.clone(),
            client_id: subscription.client_id.clone(),
            message_id: message.id,
            reason,
        });
    }

    topic.record_dispatch(delivered, dropped);
}

/// One bounded delivery attempt.
async fn deliver(
    subscription: &Subscription,
    message: &Arc<Message>,
    wait: Duration,
) -> Result<(), DropReason> {
    if !subscription.is_live() {
        return Err(DropReason::Revoked);
    }

    let sender = subscription.sender();
    let permit = match sender.try_reserve() {
        Ok(permit) => permit,
        Err(TrySendError::Closed(())) => return Err(DropReason::Closed),
        Err(TrySendError::Full(())) if wait.is_zero() => return Err(DropReason::Full),
        Err(TrySendError::Full(())) => match tokio::time::timeout(wait, sender.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DropReason::Closed),
            Err(_) => return Err(DropReason::Timeout),
        },
    };

    if subscription.send_if_live(permit, Arc::clone(message)) {
        Ok(())
    } else {
        Err(DropReason::Revoked)
    }
}
