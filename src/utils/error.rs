//! The `error` module defines the error types used within `priosub`.
//!
//! Errors are split by where they are recovered: queue errors stay local to a
//! topic's priority queue, validation errors are answered on the connection
//! that caused them, broker errors are returned to publishers and subscribers,
//! and transport errors end a single connection. None of them is fatal to the
//! process once the server is running.

use thiserror::Error;

/// Errors raised by a topic's priority queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is full (capacity {0})")]
    Full(usize),
}

/// A request that could not be turned into a broker operation.
///
/// The `Display` output is sent back to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// `action` is missing or not a string.
    #[error("invalid action")]
    InvalidAction,

    #[error("unknown action")]
    UnknownAction,

    #[error("invalid request: {0}")]
    Malformed(String),
}

/// Errors returned by topic and broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("topic '{0}' is closed")]
    TopicClosed(String),
}

/// Failures while talking to one connected client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::Malformed(err.to_string())
    }
}
