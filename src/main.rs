//! CLI for PrioSub
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `client`: subscribe, publish once, and print what arrives (useful for smoke tests)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use priosub::broker::Broker;
use priosub::config::load_config_from;
use priosub::transport::{ShutdownSignal, start_websocket_server};
use priosub::utils::logging;

#[derive(Parser)]
#[command(name = "priosub", version, about = "Priority-ordered pub/sub broker")]
enum Command {
    /// Start the WebSocket server
    Server {
        /// Configuration file, overriding `config/default.*`
        #[arg(long)]
        config: Option<String>,
    },
    /// Run the example client
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "demo")]
        topic: String,
        #[arg(long, default_value = "Hello from priosub")]
        content: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Stop after printing this many incoming frames
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();

    match cmd {
        Command::Server { config } => {
            if let Err(e) = run_server(config.as_deref()).await {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Client {
            url,
            topic,
            content,
            priority,
            count,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &topic, &content, priority, count).await {
                error!("Client failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_from(config_path)?;
    logging::init(&config.logging.level);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Broker::new(&config.broker));
    let shutdown = ShutdownSignal::new();

    tokio::select! {
        result = start_websocket_server(&addr, broker.clone(), config.server.clone(), shutdown.clone()) => {
            match result {
                Ok(()) => info!("Shutdown requested by a client."),
                Err(e) => error!("WebSocket server exited unexpectedly: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            shutdown.trigger();
        }
    }

    let discarded = broker.shutdown();
    info!(discarded, "broker stopped");
    Ok(())
}

async fn run_client(
    url: &str,
    topic: &str,
    content: &str,
    priority: i64,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let subscribe = json!({ "action": "subscribe", "topic": topic });
    ws_stream
        .send(WsMessage::text(subscribe.to_string()))
        .await?;

    let publish = json!({
        "action": "publish",
        "message": { "topic": topic, "content": content, "priority": priority }
    });
    ws_stream.send(WsMessage::text(publish.to_string())).await?;

    let mut printed = 0;
    while printed < count {
        match tokio::time::timeout(Duration::from_secs(5), ws_stream.next()).await {
            Ok(Some(Ok(WsMessage::Text(incoming)))) => {
                println!("{incoming}");
                printed += 1;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => break,
            Err(_) => {
                warn!("no further frames within 5s");
                break;
            }
        }
    }

    ws_stream
        .send(WsMessage::text(json!({ "action": "close_connection" }).to_string()))
        .await?;
    Ok(())
}
