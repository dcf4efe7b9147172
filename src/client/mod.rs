//! The `client` module defines the representation of a client in the Pub/Sub system.
//!
//! It provides the `Client` struct, which encapsulates the state of a single
//! connected client: its unique identifier, the channel for sending frames to
//! it, and the relays forwarding its topic deliveries.

pub mod pubsub_client;
pub use pubsub_client::Client;
