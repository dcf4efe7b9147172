//! The `broker` module is the priority dispatch engine: per-topic priority
//! queues, subscription tables, dispatcher tasks and the registry tying them
//! to topic names.

pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod message;
pub mod queue;
pub mod registry;
pub mod subscription;
pub mod topic;

pub use dispatcher::DispatcherState;
pub use engine::Broker;
pub use events::{BrokerEvent, DropReason, EventReporter};
pub use message::{Message, Priority};
pub use queue::PriorityQueue;
pub use registry::TopicRegistry;
pub use subscription::{ClientId, Delivery, Subscription, SubscriptionTable};
pub use topic::{StatsSnapshot, Topic, TopicConfig};

#[cfg(test)]
mod tests;
