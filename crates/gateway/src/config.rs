//! Configuration management for the gateway.
//!
//! This module handles loading, validation, and conversion of gateway
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use anyhow::{Context, Result};
use gateway_server::{ServerConfig, WireFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn default_bind_address() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_io_timeout() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    90
}

fn default_max_connections() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_wire_format() -> String {
    "json".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_broadcast_buffer() -> usize {
    1000
}

fn default_broadcast_write_timeout() -> u64 {
    10
}

fn default_error_write_timeout() -> u64 {
    5
}

fn default_profile_cache_ttl() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and connection settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Fan-out pipeline sizing
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener, per-connection and heartbeat settings. Durations are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "0.0.0.0:8888")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP path accepting WebSocket upgrades
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_io_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_io_timeout")]
    pub write_timeout: u64,
    /// Largest accepted frame in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,
    /// Maximum number of logged-in connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    /// Allowed `Origin` values; empty or `"*"` allows all
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// "json" or "binary"
    #[serde(default = "default_wire_format")]
    pub wire_format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            path: default_path(),
            read_timeout: default_io_timeout(),
            write_timeout: default_io_timeout(),
            max_message_size: default_max_message_size(),
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            max_connections: default_max_connections(),
            enable_compression: default_true(),
            allowed_origins: Vec::new(),
            wire_format: default_wire_format(),
        }
    }
}

/// Worker pool and broadcast buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,
    #[serde(default = "default_broadcast_write_timeout")]
    pub broadcast_write_timeout: u64,
    #[serde(default = "default_error_write_timeout")]
    pub error_write_timeout: u64,
    #[serde(default = "default_profile_cache_ttl")]
    pub profile_cache_ttl: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            broadcast_buffer: default_broadcast_buffer(),
            broadcast_write_timeout: default_broadcast_write_timeout(),
            error_write_timeout: default_error_write_timeout(),
            profile_cache_ttl: default_profile_cache_ttl(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(path) = &args.path {
            self.server.path = path.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(format) = &args.wire_format {
            self.server.wire_format = format.clone();
        }
        if let Some(limit) = args.max_connections {
            self.server.max_connections = limit;
        }
    }

    /// Converts the file configuration into the gateway's runtime settings.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let server = &self.server;
        let dispatch = &self.dispatch;
        Ok(ServerConfig {
            bind_address: server
                .bind_address
                .parse()
                .with_context(|| format!("Invalid bind address: {}", server.bind_address))?,
            path: server.path.clone(),
            read_timeout: Duration::from_secs(server.read_timeout),
            write_timeout: Duration::from_secs(server.write_timeout),
            max_message_size: server.max_message_size,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval),
            heartbeat_timeout: Duration::from_secs(server.heartbeat_timeout),
            max_connections: server.max_connections,
            enable_compression: server.enable_compression,
            allowed_origins: server.allowed_origins.clone(),
            wire_format: server
                .wire_format
                .parse::<WireFormat>()?,
            dispatch_workers: dispatch.workers,
            worker_queue_capacity: dispatch.queue_capacity,
            broadcast_buffer: dispatch.broadcast_buffer,
            broadcast_write_timeout: Duration::from_secs(dispatch.broadcast_write_timeout),
            error_write_timeout: Duration::from_secs(dispatch.error_write_timeout),
            profile_cache_ttl: Duration::from_secs(dispatch.profile_cache_ttl),
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if !self.server.path.starts_with('/') {
            return Err(format!("WebSocket path must start with '/': {}", self.server.path));
        }

        if self.server.heartbeat_interval == 0 {
            return Err("Heartbeat interval must be at least one second".to_string());
        }
        if self.server.heartbeat_timeout < self.server.heartbeat_interval {
            return Err("Heartbeat timeout must not be shorter than the interval".to_string());
        }
        if self.server.read_timeout == 0 || self.server.write_timeout == 0 {
            return Err("Read and write timeouts must be at least one second".to_string());
        }

        if self.server.max_connections == 0 {
            return Err("Max connections must be greater than zero".to_string());
        }
        if self.server.max_message_size == 0 {
            return Err("Max message size must be greater than zero".to_string());
        }

        if self.server.wire_format.parse::<WireFormat>().is_err() {
            return Err(format!(
                "Invalid wire format: {}. Must be one of: [\"json\", \"binary\"]",
                &self.server.wire_format
            ));
        }

        if self.dispatch.workers == 0
            || self.dispatch.queue_capacity == 0
            || self.dispatch.broadcast_buffer == 0
        {
            return Err("Dispatch workers, queue capacity and broadcast buffer must be non-zero".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
