//! # PrioSub
//!
//! `priosub` is an in-memory, topic-based publish/subscribe broker in which
//! every topic delivers its messages in priority order. Lower priority values
//! are delivered first; equal priorities keep their publish order. Clients
//! talk to it over WebSockets using a small JSON protocol.
//!
//! ## Core Modules
//!
//! - `broker`: topics, their priority queues and subscription tables, and the
//!   per-topic dispatcher that fans messages out to subscribers.
//! - `client`: represents a connected WebSocket client.
//! - `config`: layered settings loading (defaults, file, environment).
//! - `transport`: the JSON protocol and the WebSocket server.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
