use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::message::{Message, Priority};

/// A request exactly as it arrived on the wire.
///
/// Fields are kept as optional untyped values so that a missing or
/// wrong-typed one can be reported by name instead of as a generic decode
/// failure; see [`decode_request`](crate::transport::protocol::decode_request).
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Publish { message: Option<Value> },
    Subscribe { topic: Option<Value> },
    Unsubscribe { topic: Option<Value> },
    Shutdown,
    CloseConnection,
    #[serde(other)]
    Unknown,
}

/// Delivery event pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub message_id: String,
    pub topic: String,
    pub content: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Deliver {
        action: String,
        message: DeliveryEvent,
    },
    Status {
        status: String,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn ok() -> Self {
        ServerMessage::Status {
            status: "ok".to_string(),
        }
    }

    pub fn error(err: impl Display) -> Self {
        ServerMessage::Error {
            error: err.to_string(),
        }
    }

    pub fn deliver(message: &Message) -> Self {
        ServerMessage::Deliver {
            action: "deliver".to_string(),
            message: DeliveryEvent {
                message_id: message.id.to_string(),
                topic: message.topic.clone(),
                content: message.content.clone(),
                priority: message.priority,
            },
        }
    }
}
