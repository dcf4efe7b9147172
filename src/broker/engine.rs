//! Broker engine
//!
//! The `Broker` is the entry point the transport layer talks to. It owns the
//! topic registry and routes publish/subscribe/unsubscribe by topic name.
//!
//! Concurrency and usage notes:
//! - the API is synchronous and takes `&self`; share the broker as
//!   `Arc<Broker>` rather than behind an outer lock
//! - topics are created lazily on publish and subscribe and need a running
//!   Tokio runtime for their dispatcher task
//! - unsubscribe never creates a topic

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::broker::events::{BrokerEvent, EventReporter};
use crate::broker::message::{Message, Priority};
use crate::broker::registry::TopicRegistry;
use crate::broker::subscription::Delivery;
use crate::broker::topic::{Topic, TopicConfig};
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;

#[derive(Debug)]
pub struct Broker {
    registry: TopicRegistry,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(&BrokerSettings::default())
    }
}

impl Broker {
    /// Creates a broker whose events are only logged.
    pub fn new(settings: &BrokerSettings) -> Self {
        Self::with_reporter(TopicConfig::from(settings), EventReporter::new())
    }

    /// Creates a broker that also forwards every [`BrokerEvent`] to the
    /// returned receiver.
    pub fn with_events(settings: &BrokerSettings) -> (Self, UnboundedReceiver<BrokerEvent>) {
        let (reporter, events) = EventReporter::channel();
        (
            Self::with_reporter(TopicConfig::from(settings), reporter),
            events,
        )
    }

    pub fn with_reporter(config: TopicConfig, reporter: EventReporter) -> Self {
        Self {
            registry: TopicRegistry::new(config, reporter),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Returns the named topic, creating it on first use.
    pub fn topic(&self, name: &str) -> Arc<Topic> {
        self.registry.get_or_create(name)
    }

    pub fn publish(
        &self,
        topic: &str,
        content: impl Into<String>,
        priority: Priority,
    ) -> Result<Message, BrokerError> {
        self.topic(topic).publish(content, priority)
    }

    pub fn subscribe(&self, topic: &str, client_id: &str) -> Result<Delivery, BrokerError> {
        self.topic(topic).subscribe(client_id)
    }

    /// Removes `client_id` from `topic`. Unknown topics and clients that were
    /// not subscribed are ignored.
    pub fn unsubscribe(&self, topic: &str, client_id: &str) -> bool {
        self.registry
            .get(topic)
            .is_some_and(|topic| topic.unsubscribe(client_id))
    }

    /// Unsubscribes a client from every topic, e.g. after its connection
    /// closed. Returns how many subscriptions were removed.
    pub fn cleanup_client(&self, client_id: &str) -> usize {
        let removed = self
            .registry
            .topics()
            .iter()
            .filter(|topic| topic.unsubscribe(client_id))
            .count();

        if removed > 0 {
            info!(%client_id, removed, "cleaned up client subscriptions");
        }
        removed
    }

    /// Shuts down every topic. Returns the total number of undelivered
    /// messages that were discarded.
    pub fn shutdown(&self) -> usize {
        let discarded: usize = self
            .registry
            .topics()
            .iter()
            .map(|topic| topic.shutdown())
            .sum();
        info!(topics = self.registry.len(), discarded, "broker shut down");
        discarded
    }
}
