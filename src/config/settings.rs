use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the message broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to, and how many outbound
/// frames may wait for a slow connection.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub outbound_buffer: usize,
}

/// Configuration settings for the broker.
///
/// `queue_capacity` of zero means a topic's pending queue is unbounded.
/// `delivery_timeout_ms` of zero makes every delivery attempt non-blocking.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub queue_capacity: usize,
    pub delivery_buffer: usize,
    pub delivery_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

impl BrokerSettings {
    pub fn queue_capacity(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }

    /// Channel capacity for a single subscription. Tokio channels need at
    /// least one slot.
    pub fn delivery_buffer(&self) -> usize {
        self.delivery_buffer.max(1)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Settings as read from files and the environment. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub outbound_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub queue_capacity: Option<usize>,
    pub delivery_buffer: Option<usize>,
    pub delivery_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let broker = self.broker;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                outbound_buffer: server
                    .as_ref()
                    .and_then(|s| s.outbound_buffer)
                    .unwrap_or(default.server.outbound_buffer),
            },
            broker: BrokerSettings {
                queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.queue_capacity)
                    .unwrap_or(default.broker.queue_capacity),
                delivery_buffer: broker
                    .as_ref()
                    .and_then(|b| b.delivery_buffer)
                    .unwrap_or(default.broker.delivery_buffer),
                delivery_timeout_ms: broker
                    .as_ref()
                    .and_then(|b| b.delivery_timeout_ms)
                    .unwrap_or(default.broker.delivery_timeout_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            outbound_buffer: 256,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 0,
            delivery_buffer: 64,
            delivery_timeout_ms: 0,
        }
    }
}
