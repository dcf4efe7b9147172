//! The `transport` module is responsible for handling network communication
//! with clients, via WebSockets.
//!
//! It defines the JSON protocol used between clients and the server, validates
//! incoming requests, and implements the WebSocket server itself: accepting
//! connections, answering requests, and relaying topic deliveries.

pub mod message;
pub mod protocol;
pub mod websocket;

pub use protocol::{Request, decode_request};
pub use websocket::{ShutdownSignal, serve, start_websocket_server};
