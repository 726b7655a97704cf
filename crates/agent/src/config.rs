//! Configuration management for the LiveShare agent.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/liveshare/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("probe_address must be an IP:port pair, got {0}")]
    InvalidProbeAddress(String),

    #[error("base_url must start with http:// or https://, got {0}")]
    InvalidBaseUrl(String),

    #[error("realtime_url must start with ws:// or wss://, got {0}")]
    InvalidRealtimeUrl(String),

    #[error("{0} must be a non-empty name without '/'")]
    InvalidCollection(String),

    #[error("presence_collection and command_collection must differ, both are {0}")]
    DuplicateCollection(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the LiveShare agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General agent configuration.
    pub agent: AgentConfig,

    /// Embedded HTTP file server.
    pub file_server: FileServerConfig,

    /// Broadcast engine settings.
    pub broadcast: BroadcastConfig,

    /// Document store used for presence and commands.
    pub store: StoreConfig,

    /// Remote command handling.
    pub commands: CommandsConfig,

    /// What to do when a subsystem fails to start.
    pub policy: PolicyConfig,

    /// Local address resolution.
    pub network: NetworkConfig,
}

/// General agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory for agent runtime data.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// When set, logs are also written to daily rolling files in this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Who may read from the file server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Requests must carry the per-session token.
    #[default]
    Token,
    /// Anyone on the network can browse and download.
    Open,
}

/// Embedded file server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileServerConfig {
    /// Directory exposed over HTTP.
    pub root: PathBuf,

    /// Address the listener binds to.
    pub bind_address: String,

    /// TCP port, 0 picks an ephemeral port.
    pub port: u16,

    /// Reject paths that leave `root`.
    pub enforce_containment: bool,

    /// List dot-files in directory pages.
    pub include_hidden: bool,

    /// Access policy.
    pub access: AccessMode,

    /// Milliseconds in-flight requests get to finish when the session stops.
    pub shutdown_grace_ms: u64,
}

/// Broadcast engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Application credential handed to the engine on initialization.
    pub app_credential: String,
}

/// Which document store implementation to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store, useful for local runs and tests.
    #[default]
    Memory,
    /// REST + WebSocket document service.
    Remote,
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// REST endpoint of the remote store.
    pub base_url: String,

    /// WebSocket endpoint for realtime watches.
    pub realtime_url: String,

    /// Bearer key sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Collection holding presence records.
    pub presence_collection: String,

    /// Collection holding command records.
    pub command_collection: String,
}

/// How command snapshots are applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Skip redelivered snapshots and clear with a compare-and-set.
    #[default]
    Deduplicated,
    /// Apply every delivery and clear unconditionally.
    AtLeastOnce,
}

/// Remote command configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CommandsConfig {
    pub delivery: DeliveryMode,
}

/// Reaction to a subsystem failing during startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Keep running with whatever started.
    #[default]
    Continue,
    /// Tear down and fail when the file server or broadcast cannot start.
    FailFast,
}

/// Startup policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub degraded_mode: DegradedMode,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Remote address used to find the outbound interface. Nothing is sent to it.
    pub probe_address: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            root: default_file_root(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enforce_containment: true,
            include_hidden: true,
            access: AccessMode::Token,
            shutdown_grace_ms: 2000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            base_url: "http://127.0.0.1:8787".to_string(),
            realtime_url: "ws://127.0.0.1:8787/realtime".to_string(),
            api_key: None,
            presence_collection: "active_cameras".to_string(),
            command_collection: "commands".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_address: "8.8.8.8:80".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("liveshare")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("liveshare")
}

/// Returns the default shared directory.
fn default_file_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - LIVESHARE_STORE_URL: Override the store REST endpoint
    /// - LIVESHARE_REALTIME_URL: Override the store realtime endpoint
    /// - LIVESHARE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - LIVESHARE_FILE_ROOT: Override the shared directory
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env("LIVESHARE_STORE_URL") {
            tracing::info!("Overriding store base_url from environment: {}", url);
            self.store.base_url = url;
        }

        if let Some(url) = non_empty_env("LIVESHARE_REALTIME_URL") {
            tracing::info!("Overriding store realtime_url from environment: {}", url);
            self.store.realtime_url = url;
        }

        if let Some(level) = non_empty_env("LIVESHARE_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.agent.log_level = level;
        }

        if let Some(root) = non_empty_env("LIVESHARE_FILE_ROOT") {
            tracing::info!("Overriding file_server root from environment: {}", root);
            self.file_server.root = PathBuf::from(root);
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.agent.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.agent.log_level.clone()));
        }

        if self.file_server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.file_server.bind_address.clone(),
            ));
        }

        if self.network.probe_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidProbeAddress(
                self.network.probe_address.clone(),
            ));
        }

        let base = &self.store.base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(base.clone()));
        }

        let realtime = &self.store.realtime_url;
        if !realtime.starts_with("ws://") && !realtime.starts_with("wss://") {
            return Err(ConfigError::InvalidRealtimeUrl(realtime.clone()));
        }

        for (name, value) in [
            ("presence_collection", &self.store.presence_collection),
            ("command_collection", &self.store.command_collection),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(ConfigError::InvalidCollection(name.to_string()));
            }
        }

        if self.store.presence_collection == self.store.command_collection {
            return Err(ConfigError::DuplicateCollection(
                self.store.presence_collection.clone(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
