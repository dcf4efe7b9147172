//! Client representation
//!
//! `Client` models one connected WebSocket client: its id, the sending side
//! of its bounded outbound channel, and the relay tasks that forward topic
//! deliveries into that channel. The id is used as the subscriber id on every
//! topic the client joins and stays the same for the life of the connection.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::subscription::{ClientId, Delivery};
use crate::transport::message::ServerMessage;
use crate::utils::error::TransportError;

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    sender: mpsc::Sender<WsMessage>,
    relays: HashMap<String, JoinHandle<()>>,
}

impl Client {
    /// Create a new client with a sender channel. The `id` embeds a UUID.
    pub fn new(sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            relays: HashMap::new(),
        }
    }

    /// Queues `message` for the writer task, waiting for room if the
    /// connection is slow.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        send_frame(&self.sender, message).await
    }

    /// Starts forwarding `delivery` to this client. A relay left over from an
    /// earlier subscription to the same topic is detached; its channel has
    /// already been revoked, so it ends once drained.
    pub fn spawn_relay(&mut self, topic: &str, mut delivery: Delivery) {
        let sender = self.sender.clone();
        let client_id = self.id.clone();
        let relay_topic = topic.to_string();

        let handle = tokio::spawn(async move {
            while let Some(message) = delivery.recv().await {
                if let Err(e) = send_frame(&sender, &ServerMessage::deliver(&message)).await {
                    warn!(%client_id, topic = %relay_topic, "relay stopped: {e}");
                    return;
                }
            }
            debug!(%client_id, topic = %relay_topic, "relay finished");
        });

        self.relays.insert(topic.to_string(), handle);
    }

    /// Forgets the relay for `topic` without aborting it, so deliveries that
    /// were already buffered still reach the client.
    pub fn release_relay(&mut self, topic: &str) {
        self.relays.remove(topic);
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Aborts every relay. Used when the connection is gone.
    pub fn stop_relays(&mut self) {
        for (_, handle) in self.relays.drain() {
            handle.abort();
        }
    }
}

async fn send_frame(
    sender: &mpsc::Sender<WsMessage>,
    message: &ServerMessage,
) -> Result<(), TransportError> {
    let text = serde_json::to_string(message)?;
    sender
        .send(WsMessage::text(text))
        .await
        .map_err(|_| TransportError::Closed)
}
