//! Configuration management for the Together room server.
//!
//! Settings are read from a TOML file, overridden from the command line,
//! validated, and finally translated into the library's [`ServerConfig`].

use anyhow::{anyhow, Context, Result};
use room_server::{AdmissionScope, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::CliArgs;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
///
/// Every section may be omitted; missing values take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub protocol: ProtocolSettings,
    pub rooms: RoomSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

/// Network binding and connection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
}

/// Wire-level limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Largest accepted frame payload in bytes
    pub max_frame_bytes: u32,
    /// Frames buffered per connection before pushes are dropped
    pub outbound_queue_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    /// Upper bound for the capacity of a new room
    pub max_capacity: u32,
    /// `global` or `per_room`
    pub admission_scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database file, created on first start
    pub path: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_address: defaults.bind_address.to_string(),
            max_connections: defaults.max_connections,
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            max_frame_bytes: defaults.max_frame_bytes,
            outbound_queue_depth: defaults.outbound_queue_depth,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            max_capacity: defaults.max_room_capacity,
            admission_scope: defaults.admission_scope.to_string(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "together.db".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// that path and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(database_path) = &args.database_path {
            self.database.path = database_path.to_string_lossy().into_owned();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }
        if self.protocol.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be greater than zero".to_string());
        }
        if self.protocol.outbound_queue_depth == 0 {
            return Err("outbound_queue_depth must be greater than zero".to_string());
        }
        if self.rooms.max_capacity == 0 {
            return Err("rooms.max_capacity must be greater than zero".to_string());
        }
        self.rooms.admission_scope.parse::<AdmissionScope>()?;
        if self.database.path.trim().is_empty() {
            return Err("database.path cannot be empty".to_string());
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            ));
        }
        Ok(())
    }

    /// Converts the application configuration into the server's own type.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address {}", self.server.bind_address))?,
            max_connections: self.server.max_connections,
            max_frame_bytes: self.protocol.max_frame_bytes,
            outbound_queue_depth: self.protocol.outbound_queue_depth,
            max_room_capacity: self.rooms.max_capacity,
            admission_scope: self.rooms.admission_scope.parse().map_err(|e: String| anyhow!(e))?,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}
