//! Node configuration.
//!
//! Sources are layered, later ones winning:
//!
//! 1. Built-in defaults
//! 2. Optional configuration file (YAML, TOML or JSON)
//! 3. `SOCKET_PORT` and `NEXT_PUBLIC_CLIENT_URL`
//! 4. `HUDDLE_*` environment variables (`__` separates nested keys,
//!    e.g. `HUDDLE_RELAY__QUEUE_CAPACITY=512`)
//! 5. Command-line flags (applied by the binary)

use crate::error::{NodeError, Result};
use crate::observability::LogFormat;
use axum::http::HeaderName;
use config::{Config, Environment, File};
use huddle_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Configuration for a Huddle relay node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interface to listen on.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Origins allowed by CORS. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Log level.
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_bytes: usize,
    /// Relay core tunables.
    pub relay: RelayConfig,
    /// Message persistence forwarding.
    pub persistence: PersistenceConfig,
    /// Room join restrictions.
    pub authorization: AuthorizationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_message_bytes: 64 * 1024,
            relay: RelayConfig::default(),
            persistence: PersistenceConfig::default(),
            authorization: AuthorizationConfig::default(),
        }
    }
}

/// Where relayed messages are forwarded for durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// URL receiving a JSON POST per message. Disabled when unset.
    pub endpoint: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5000,
        }
    }
}

impl PersistenceConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connection identity and static room restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Header carrying the authenticated user id, set by a trusted fronting
    /// proxy. When unset every connection is anonymous.
    pub user_header: Option<String>,
    /// Restricted rooms: room id to the user ids allowed to join it. Rooms
    /// not listed are open to everyone.
    pub rooms: HashMap<String, Vec<String>>,
}

impl AuthorizationConfig {
    /// Parsed identity header name.
    pub fn user_header(&self) -> Result<Option<HeaderName>> {
        self.user_header
            .as_deref()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    NodeError::InvalidConfig(format!(
                        "authorization.user_header is not a valid header name: {}",
                        name
                    ))
                })
            })
            .transpose()
    }
}

impl NodeConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, std::env::vars().collect())
    }

    /// Load configuration from an optional file and the given environment.
    pub fn load_from(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let mut legacy = HashMap::new();
        if let Some(port) = env.get("SOCKET_PORT") {
            legacy.insert("PORT".to_string(), port.clone());
        }
        if let Some(origin) = env.get("NEXT_PUBLIC_CLIENT_URL") {
            legacy.insert("ALLOWED_ORIGINS".to_string(), origin.clone());
        }

        let config: NodeConfig = builder
            .add_source(
                Environment::default()
                    .source(Some(legacy))
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins"),
            )
            .add_source(
                Environment::with_prefix("HUDDLE")
                    .prefix_separator("_")
                    .separator("__")
                    .source(Some(env))
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        let zero = [
            ("relay.queue_capacity", relay.queue_capacity),
            ("relay.max_connections", relay.max_connections),
            ("relay.max_rooms_per_connection", relay.max_rooms_per_connection),
            ("relay.persistence_queue_capacity", relay.persistence_queue_capacity),
            ("max_message_bytes", self.max_message_bytes),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((name, _)) = zero {
            return Err(NodeError::InvalidConfig(format!("{} must be positive", name)));
        }
        if self.allowed_origins.is_empty() {
            return Err(NodeError::InvalidConfig(
                "allowed_origins must not be empty".to_string(),
            ));
        }
        if self.persistence.endpoint.as_deref() == Some("") {
            return Err(NodeError::InvalidConfig(
                "persistence.endpoint must not be empty when set".to_string(),
            ));
        }
        self.authorization.user_header()?;
        Ok(())
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Parsed log format.
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }
}
