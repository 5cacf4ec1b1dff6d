//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::storage::{MemoryMessageStore, MessageStore, SqliteMessageStore, StoreResult};
use crate::websocket::{
    GatewayConfig, HeartbeatConfig, HubConfig, PersistFailurePolicy, SessionConfig,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Queue sizes for the connection hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_command_capacity() -> usize {
    1024
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

/// Per-connection limits and heartbeat timing
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,

    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Ping period as a fraction of `pong_wait_secs`
    #[serde(default = "default_ping_ratio")]
    pub ping_ratio: f64,
}

fn default_max_frame_bytes() -> usize {
    512
}

fn default_write_wait() -> u64 {
    10
}

fn default_pong_wait() -> u64 {
    60
}

fn default_ping_ratio() -> f64 {
    0.9
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            write_wait_secs: default_write_wait(),
            pong_wait_secs: default_pong_wait(),
            ping_ratio: default_ping_ratio(),
        }
    }
}

/// Message acceptance rules
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,

    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    #[serde(default)]
    pub persist_failure_policy: PersistFailurePolicy,
}

fn default_backlog_limit() -> usize {
    50
}

fn default_max_content_bytes() -> usize {
    400
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            backlog_limit: default_backlog_limit(),
            max_content_bytes: default_max_content_bytes(),
            persist_failure_policy: PersistFailurePolicy::default(),
        }
    }
}

/// Which message store to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Message store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("murmur").join("murmur.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./murmur_data/murmur.db".to_string())
}

fn default_memory_capacity() -> usize {
    1000
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl StorageSection {
    /// Database path with a leading `~` expanded to the home directory
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }

    /// Open the configured store
    pub fn open(&self) -> StoreResult<Arc<dyn MessageStore>> {
        match self.backend {
            StorageBackend::Sqlite => Ok(Arc::new(SqliteMessageStore::open(self.resolved_path())?)),
            StorageBackend::Memory => Ok(Arc::new(MemoryMessageStore::new(self.memory_capacity))),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => {
            tracing::warn!("No home directory, using {:?} as given", path);
            PathBuf::from(path)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("murmur").join("config.toml")),
            Some(PathBuf::from("/etc/murmur/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MURMUR_HOST") {
            self.server.host = host;
        }
        // PORT is honoured for platforms that inject it; MURMUR_PORT wins
        for key in ["PORT", "MURMUR_PORT"] {
            if let Some(port) = lookup(key) {
                match port.parse() {
                    Ok(p) => self.server.port = p,
                    Err(_) => tracing::warn!("Ignoring {}={:?}: not a port", key, port),
                }
            }
        }

        if let Some(path) = lookup("MURMUR_DB_PATH") {
            self.storage.path = path;
        }
        if let Some(backend) = lookup("MURMUR_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.storage.backend = b,
                Err(e) => tracing::warn!("Ignoring MURMUR_STORAGE_BACKEND: {}", e),
            }
        }

        if let Some(policy) = lookup("MURMUR_PERSIST_POLICY") {
            match policy.parse() {
                Ok(p) => self.gateway.persist_failure_policy = p,
                Err(e) => tracing::warn!("Ignoring MURMUR_PERSIST_POLICY: {}", e),
            }
        }

        if let Some(level) = lookup("MURMUR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("MURMUR_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.hub.outbound_capacity.max(1),
            command_capacity: self.hub.command_capacity.max(1),
        }
    }

    /// The backlog is capped at the outbound queue size, since a larger one
    /// could never be queued in full and would drop every new connection
    pub fn gateway_config(&self) -> GatewayConfig {
        let capacity = self.hub_config().outbound_capacity;
        let mut backlog_limit = self.gateway.backlog_limit;
        if backlog_limit > capacity {
            tracing::warn!(
                "gateway.backlog_limit {} exceeds hub.outbound_capacity {}, using {}",
                backlog_limit,
                capacity,
                capacity
            );
            backlog_limit = capacity;
        }

        GatewayConfig {
            backlog_limit,
            max_content_bytes: self.gateway.max_content_bytes,
            persist_failure_policy: self.gateway.persist_failure_policy,
            ..GatewayConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_bytes: self.connection.max_frame_bytes,
            heartbeat: HeartbeatConfig::new(
                Duration::from_secs(self.connection.pong_wait_secs),
                Duration::from_secs(self.connection.write_wait_secs),
                self.connection.ping_ratio,
            ),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Murmur Configuration
#
# Environment variables override these settings:
# - MURMUR_HOST
# - MURMUR_PORT (or PORT)
# - MURMUR_DB_PATH
# - MURMUR_STORAGE_BACKEND
# - MURMUR_PERSIST_POLICY
# - MURMUR_LOG_LEVEL
# - MURMUR_LOG_FORMAT

[server]
# Address to bind to
host = "0.0.0.0"

# Port to listen on
port = 8080

[hub]
# Frames buffered per connection before it is dropped as a slow consumer
outbound_capacity = 256

# Pending hub operations before callers wait
command_capacity = 1024

[connection]
# Largest inbound frame accepted (bytes)
max_frame_bytes = 512

# Time allowed for a single write (seconds)
write_wait_secs = 10

# Time allowed between pongs before the peer is dropped (seconds)
pong_wait_secs = 60

# Ping period as a fraction of pong_wait_secs
ping_ratio = 0.9

[gateway]
# Messages replayed to each new connection
backlog_limit = 50

# Maximum message content length (bytes)
max_content_bytes = 400

# What to do when a message cannot be saved:
# durability (drop it) or availability (broadcast anyway)
persist_failure_policy = "durability"

[storage]
# Backend: sqlite or memory
backend = "sqlite"

# SQLite database file
path = "~/.local/share/murmur/murmur.db"

# Messages kept by the memory backend
memory_capacity = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
