//! The `utils` module provides the error types and logging setup shared
//! across the `priosub` application.

pub mod error;
pub mod logging;

pub use error::{BrokerError, QueueError, TransportError, ValidationError};
