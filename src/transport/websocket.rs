use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::client::Client;
use crate::config::ServerSettings;
use crate::transport::message::ServerMessage;
use crate::transport::protocol::{Request, decode_request};
use crate::utils::error::TransportError;

const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-wide stop flag. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called, immediately
    /// if it already was.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

enum Flow {
    Continue,
    Close,
}

pub async fn start_websocket_server(
    addr: &str,
    broker: Arc<Broker>,
    settings: ServerSettings,
    shutdown: ShutdownSignal,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);

    serve(listener, broker, settings, shutdown).await
}

/// Accepts connections on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    settings: ServerSettings,
    shutdown: ShutdownSignal,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "accepted connection");
                spawn(handle_connection(
                    stream,
                    broker.clone(),
                    settings.outbound_buffer,
                    shutdown.clone(),
                ));
            }
            _ = shutdown.wait() => {
                info!("WebSocket server stopped accepting connections");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Arc<Broker>,
    outbound_buffer: usize,
    shutdown: ShutdownSignal,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(outbound_buffer.max(1));
    let mut client = Client::new(tx);
    let client_id = client.id.clone();
    info!(%client_id, "client connected");

    // Sole writer to the socket; ends once every sender is gone.
    let mut writer = spawn(async move {
        while let Some(frame) = rx.recv().await {
            ws_sender.send(frame).await?;
        }
        ws_sender.close().await?;
        Ok::<(), TransportError>(())
    });
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(%client_id, "read error: {e}");
                        break;
                    }
                };

                match handle_text(&broker, &mut client, &shutdown, text.as_str()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break,
                    Err(e) => {
                        warn!(%client_id, "failed to respond: {e}");
                        break;
                    }
                }
            }
            result = &mut writer => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%client_id, "write error: {e}"),
                    Err(e) => warn!(%client_id, "writer task failed: {e}"),
                }
                break;
            }
            _ = shutdown.wait() => break,
        }
    }

    let removed = broker.cleanup_client(&client_id);
    client.stop_relays();
    drop(client);

    if !writer_done && timeout(WRITER_FLUSH_TIMEOUT, writer).await.is_err() {
        warn!(%client_id, "timed out flushing outbound frames");
    }
    info!(%client_id, subscriptions = removed, "client disconnected");
}

async fn handle_text(
    broker: &Broker,
    client: &mut Client,
    shutdown: &ShutdownSignal,
    text: &str,
) -> Result<Flow, TransportError> {
    let request = match decode_request(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(client_id = %client.id, "rejected request: {e}");
            client.send(&ServerMessage::error(e)).await?;
            return Ok(Flow::Continue);
        }
    };

    match request {
        Request::Publish {
            topic,
            content,
            priority,
        } => {
            let reply = match broker.publish(&topic, content, priority) {
                Ok(message) => {
                    debug!(client_id = %client.id, %topic, priority, id = %message.id, "published");
                    ServerMessage::ok()
                }
                Err(e) => ServerMessage::error(e),
            };
            client.send(&reply).await?;
        }
        Request::Subscribe { topic } => match broker.subscribe(&topic, &client.id) {
            Ok(delivery) => {
                // Acknowledge before the relay starts so "ok" precedes deliveries.
                client.send(&ServerMessage::ok()).await?;
                client.spawn_relay(&topic, delivery);
                info!(client_id = %client.id, %topic, "subscribed");
            }
            Err(e) => client.send(&ServerMessage::error(e)).await?,
        },
        Request::Unsubscribe { topic } => {
            if broker.unsubscribe(&topic, &client.id) {
                info!(client_id = %client.id, %topic, "unsubscribed");
            }
            client.release_relay(&topic);
            client.send(&ServerMessage::ok()).await?;
        }
        Request::Shutdown => {
            info!(client_id = %client.id, "shutdown requested");
            shutdown.trigger();
            return Ok(Flow::Close);
        }
        Request::CloseConnection => return Ok(Flow::Close),
    }

    Ok(Flow::Continue)
}
