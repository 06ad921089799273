//! TOML Configuration File Support
//!
//! Centralized configuration for the relay daemon and both clients, read
//! from `~/.config/panelsync/panelsync.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`PANELSYNC_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [relay]
//! bind_address = "0.0.0.0:8765"
//! static_dir = "/srv/panelsync/remote"
//! max_message_size = 1048576
//!
//! [client]
//! relay_url = "ws://stage-laptop.local:8765/ws"
//! reconnect_delay_ms = 3000
//!
//! [timing]
//! rename_debounce_ms = 500
//! master_debounce_ms = 300
//! update_spacing_ms = 50
//!
//! [persistence]
//! enabled = true
//! state_path = "/home/me/.local/share/panelsync/state.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authority::AuthorityConfig;
use crate::persistence::default_state_path;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::transport::ReconnectPolicy;

/// Default relay listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8765";

/// Default relay URL for clients
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8765/ws";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[relay]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Listen address, `host:port`
    pub bind_address: Option<String>,
    /// Directory served for non-WebSocket requests
    pub static_dir: Option<PathBuf>,
    /// Largest accepted frame in bytes
    pub max_message_size: Option<usize>,
    /// Per-connection outbound queue length
    pub channel_capacity: Option<usize>,
    /// Seconds between sweeps for dead connections
    pub cleanup_interval_secs: Option<u64>,
}

/// `[client]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Relay WebSocket URL
    pub relay_url: Option<String>,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: Option<u64>,
    /// Limit on a single connection attempt in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// `[timing]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingToml {
    /// Quiet window before a rename is broadcast
    pub rename_debounce_ms: Option<u64>,
    /// Quiet window before edited master code is re-evaluated
    pub master_debounce_ms: Option<u64>,
    /// Gap between activations in "update all"
    pub update_spacing_ms: Option<u64>,
    /// Flash cue length
    pub flash_duration_ms: Option<u64>,
}

/// `[persistence]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceToml {
    /// Whether the primary saves its panels
    pub enabled: Option<bool>,
    /// State file location
    pub state_path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelsyncToml {
    /// Relay daemon settings
    pub relay: RelayToml,
    /// Client connection settings
    pub client: ClientToml,
    /// Authority timing
    pub timing: TimingToml,
    /// Primary persistence
    pub persistence: PersistenceToml,
}

// =============================================================================
// Main Configuration Structs
// =============================================================================

/// Effective relay daemon settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listen address, `host:port`
    pub bind_address: String,
    /// Directory served for non-WebSocket requests
    pub static_dir: Option<PathBuf>,
    /// Largest accepted frame in bytes
    pub max_message_size: usize,
    /// Per-connection outbound queue length
    pub channel_capacity: usize,
    /// Interval between sweeps for dead connections
    pub cleanup_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            static_dir: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            channel_capacity: 256,
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Effective client settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Reconnect timing
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Centralized configuration
///
/// Use [`load_config`] to resolve it from every source.
#[derive(Clone, Debug)]
pub struct PanelsyncConfig {
    /// Relay daemon settings
    pub relay: RelayConfig,
    /// Client connection settings
    pub client: ClientConfig,
    /// Authority timing
    pub authority: AuthorityConfig,
    /// Whether the primary saves its panels
    pub persistence_enabled: bool,
    /// State file location
    pub state_path: Option<PathBuf>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for PanelsyncConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            client: ClientConfig::default(),
            authority: AuthorityConfig::default(),
            persistence_enabled: true,
            state_path: default_state_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl PanelsyncConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the system unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.max_message_size must be positive".to_string(),
            ));
        }
        if self.relay.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "relay.channel_capacity must be positive".to_string(),
            ));
        }
        if !(self.client.relay_url.starts_with("ws://")
            || self.client.relay_url.starts_with("wss://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "client.relay_url must be a ws:// or wss:// URL, got {}",
                self.client.relay_url
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/panelsync/panelsync.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("panelsync").join("panelsync.toml"))
}

/// Load configuration from the default file, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result fails validation. A missing file is not an error.
pub fn load_config() -> Result<PanelsyncConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the result
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PanelsyncConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_with(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn load_file(path: Option<PathBuf>) -> Result<PanelsyncConfig, ConfigError> {
    let mut config = PanelsyncConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: PanelsyncToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
            config.config_file_path = Some(config_path);
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut PanelsyncConfig, toml: &PanelsyncToml) {
    // Relay
    if let Some(ref bind) = toml.relay.bind_address {
        config.relay.bind_address.clone_from(bind);
    }
    if toml.relay.static_dir.is_some() {
        config.relay.static_dir.clone_from(&toml.relay.static_dir);
    }
    if let Some(size) = toml.relay.max_message_size {
        config.relay.max_message_size = size;
    }
    if let Some(capacity) = toml.relay.channel_capacity {
        config.relay.channel_capacity = capacity;
    }
    if let Some(secs) = toml.relay.cleanup_interval_secs {
        config.relay.cleanup_interval = Duration::from_secs(secs);
    }

    // Client
    if let Some(ref url) = toml.client.relay_url {
        config.client.relay_url.clone_from(url);
    }
    if let Some(ms) = toml.client.reconnect_delay_ms {
        config.client.reconnect.delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.client.connect_timeout_ms {
        config.client.reconnect.connect_timeout = Duration::from_millis(ms);
    }

    // Timing
    if let Some(ms) = toml.timing.rename_debounce_ms {
        config.authority.rename_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.timing.master_debounce_ms {
        config.authority.master_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.timing.update_spacing_ms {
        config.authority.update_spacing = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.timing.flash_duration_ms {
        config.authority.flash_duration = Duration::from_millis(ms);
    }

    // Persistence
    if let Some(enabled) = toml.persistence.enabled {
        config.persistence_enabled = enabled;
    }
    if toml.persistence.state_path.is_some() {
        config.state_path.clone_from(&toml.persistence.state_path);
    }
}

/// Apply `PANELSYNC_*` overrides, reading variables through `lookup`
///
/// Unparseable values are logged and ignored.
pub fn apply_env_with<F>(config: &mut PanelsyncConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = false;

    if let Some(bind) = lookup("PANELSYNC_BIND") {
        config.relay.bind_address = bind;
        applied = true;
    }
    if let Some(dir) = lookup("PANELSYNC_STATIC_DIR") {
        config.relay.static_dir = Some(PathBuf::from(dir));
        applied = true;
    }
    if let Some(size) = parse_env(&lookup, "PANELSYNC_MAX_MESSAGE_SIZE") {
        config.relay.max_message_size = size;
        applied = true;
    }
    if let Some(url) = lookup("PANELSYNC_RELAY_URL") {
        config.client.relay_url = url;
        applied = true;
    }
    if let Some(ms) = parse_env(&lookup, "PANELSYNC_RECONNECT_DELAY_MS") {
        config.client.reconnect.delay = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(ms) = parse_env(&lookup, "PANELSYNC_RENAME_DEBOUNCE_MS") {
        config.authority.rename_debounce = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(ms) = parse_env(&lookup, "PANELSYNC_MASTER_DEBOUNCE_MS") {
        config.authority.master_debounce = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(path) = lookup("PANELSYNC_STATE_PATH") {
        config.state_path = Some(PathBuf::from(path));
        applied = true;
    }
    if let Some(value) = lookup("PANELSYNC_PERSISTENCE") {
        config.persistence_enabled = value != "0" && !value.eq_ignore_ascii_case("false");
        applied = true;
    }

    if applied {
        config.source = ConfigSource::Env;
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Relay listen address
    pub bind_address: Option<String>,
    /// Relay static directory
    pub static_dir: Option<PathBuf>,
    /// Client relay URL
    pub relay_url: Option<String>,
    /// Primary state file
    pub state_path: Option<PathBuf>,
    /// Disable persistence
    pub no_persistence: bool,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_address(mut self, bind: impl Into<String>) -> Self {
        self.bind_address = Some(bind.into());
        self
    }

    /// Set static directory override
    #[must_use]
    pub fn with_static_dir(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(dir);
        self
    }

    /// Set relay URL override
    #[must_use]
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    /// Set state path override
    #[must_use]
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    fn is_empty(&self) -> bool {
        self.bind_address.is_none()
            && self.static_dir.is_none()
            && self.relay_url.is_none()
            && self.state_path.is_none()
            && !self.no_persistence
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut PanelsyncConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref bind) = self.bind_address {
            config.relay.bind_address.clone_from(bind);
        }
        if self.static_dir.is_some() {
            config.relay.static_dir.clone_from(&self.static_dir);
        }
        if let Some(ref url) = self.relay_url {
            config.client.relay_url.clone_from(url);
        }
        if self.state_path.is_some() {
            config.state_path.clone_from(&self.state_path);
        }
        if self.no_persistence {
            config.persistence_enabled = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
