//! Server configuration types and defaults.
//!
//! This module contains the gateway configuration structure and the default
//! values used when a field is not overridden by the application config.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Wire format used for every frame on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Human-readable JSON sent as text frames.
    #[default]
    Json,
    /// Compact bincode sent as binary frames.
    #[serde(alias = "proto")]
    Binary,
}

impl FromStr for WireFormat {
    type Err = ServerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" | "proto" => Ok(WireFormat::Binary),
            other => Err(ServerError::Config(format!(
                "Unknown wire format '{other}', expected 'json' or 'binary'"
            ))),
        }
    }
}

/// Configuration structure for the gateway server.
///
/// Holds the listener settings, per-connection limits, heartbeat policy and
/// the sizing of the fan-out pipeline.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// HTTP path that accepts the WebSocket upgrade
    pub path: String,

    /// Idle time allowed between two inbound frames
    pub read_timeout: Duration,

    /// Deadline for a single outbound frame on a direct reply
    pub write_timeout: Duration,

    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,

    /// Period of the heartbeat sweep
    pub heartbeat_interval: Duration,

    /// Connections silent for longer than this are evicted by the sweep
    pub heartbeat_timeout: Duration,

    /// Maximum number of logged-in connections
    pub max_connections: usize,

    /// Whether per-message compression was requested
    pub enable_compression: bool,

    /// Origins allowed to upgrade. Empty or `*` allows every origin.
    pub allowed_origins: Vec<String>,

    pub wire_format: WireFormat,

    /// Number of fan-out workers
    pub dispatch_workers: usize,

    /// Capacity of the worker job queue
    pub worker_queue_capacity: usize,

    /// Capacity of the broadcast buffer in front of the workers
    pub broadcast_buffer: usize,

    /// Deadline for a single outbound frame during fan-out
    pub broadcast_write_timeout: Duration,

    /// Deadline for a best-effort error frame
    pub error_write_timeout: Duration,

    /// How long cached user profiles stay valid
    pub profile_cache_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8888)),
            path: "/ws".to_string(),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            max_message_size: 65536,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_connections: 10000,
            enable_compression: true,
            allowed_origins: Vec::new(),
            wire_format: WireFormat::Json,
            dispatch_workers: 10,
            worker_queue_capacity: 10000,
            broadcast_buffer: 1000,
            broadcast_write_timeout: Duration::from_secs(10),
            error_write_timeout: Duration::from_secs(5),
            profile_cache_ttl: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Returns true when the request origin passes the allow-list.
    ///
    /// Requests without an `Origin` header are only accepted when the list
    /// allows every origin.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match self.allowed_origins.first() {
            None => true,
            Some(first) if first == "*" => true,
            Some(_) => origin
                .map(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
                .unwrap_or(false),
        }
    }
}
