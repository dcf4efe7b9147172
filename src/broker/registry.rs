//! Process-wide topic registry.
//!
//! Topics are created on first use and live for the rest of the process.
//! Creation goes through `DashMap`'s entry API, which holds the shard lock
//! across the check and the insert, so concurrent first access to a name
//! still yields a single `Topic` (and a single dispatcher).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::broker::events::EventReporter;
use crate::broker::topic::{Topic, TopicConfig};

#[derive(Debug)]
pub struct TopicRegistry {
    topics: DashMap<String, Arc<Topic>>,
    config: TopicConfig,
    reporter: EventReporter,
}

impl TopicRegistry {
    pub fn new(config: TopicConfig, reporter: EventReporter) -> Self {
        Self {
            topics: DashMap::new(),
            config,
            reporter,
        }
    }

    /// Returns the topic called `name`, creating it (and starting its
    /// dispatcher) if this is the first access.
    pub fn get_or_create(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic.value());
        }

        let entry = self.topics.entry(name.to_string()).or_insert_with(|| {
            info!(topic = %name, "creating topic");
            Topic::spawn(name, self.config.clone(), self.reporter.clone())
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|topic| Arc::clone(topic.value()))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all topics, so callers can work on them without holding
    /// any shard lock.
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        self.topics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
