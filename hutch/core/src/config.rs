//! TOML configuration file support
//!
//! Centralized configuration loading for the daemon, backed by a TOML file at
//! `~/.config/hutch/hutch.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 10543
//! max_connections = 100
//!
//! [animator]
//! info_cycle_gap_ms = 1000
//!
//! [device]
//! driver = "sim"
//! sim_step_ms = 250
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::animator::AnimatorConfig;
use crate::server::ServerConfig;

/// Driver names the daemon knows how to construct.
const KNOWN_DRIVERS: [&str; 1] = ["sim"];

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Interface to bind
    pub bind_address: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Maximum number of concurrent connections
    pub max_connections: Option<usize>,

    /// Per-session outbound channel capacity
    pub session_channel_capacity: Option<usize>,
}

/// Animator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimatorToml {
    /// Pause between ambient render passes in milliseconds
    pub info_cycle_gap_ms: Option<u64>,

    /// Animator event channel capacity
    pub event_capacity: Option<usize>,
}

/// Device section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceToml {
    /// Driver to construct (`"sim"` is the only one built in)
    pub driver: Option<String>,

    /// Simulated step duration in milliseconds
    pub sim_step_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HutchToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Animator configuration section
    pub animator: AnimatorToml,

    /// Device configuration section
    pub device: DeviceToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Device driver selection and tuning.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Driver name; validated against the drivers built into the daemon.
    pub driver: String,

    /// Step duration for the simulated driver.
    pub sim_step: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: "sim".to_string(),
            sim_step: Duration::from_millis(250),
        }
    }
}

/// Consolidated configuration for the daemon
///
/// Use [`load_config`] to load configuration with proper priority handling,
/// then [`ConfigOverrides`] for CLI arguments.
#[derive(Clone, Debug)]
pub struct HutchConfig {
    /// TCP server configuration
    pub server: ServerConfig,

    /// Animator configuration
    pub animator: AnimatorConfig,

    /// Device driver configuration
    pub device: DeviceConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for HutchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            animator: AnimatorConfig::default(),
            device: DeviceConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl HutchConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the daemon cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_connections must be non-zero".to_string(),
            ));
        }
        if self.server.session_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "server.session_channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.animator.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "animator.event_capacity must be non-zero".to_string(),
            ));
        }
        if !KNOWN_DRIVERS.contains(&self.device.driver.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown device driver {:?} (known: {})",
                self.device.driver,
                KNOWN_DRIVERS.join(", ")
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/hutch/hutch.toml` or `~/.config/hutch/hutch.toml`
/// if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hutch").join("hutch.toml"))
}

/// Load configuration from the default path with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<HutchConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only
///   defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<HutchConfig, ConfigError> {
    let mut config = HutchConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: HutchToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "config file not found, using defaults");
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut HutchConfig, toml: &HutchToml) {
    if let Some(ref addr) = toml.server.bind_address {
        config.server.bind_address = addr.clone();
    }
    if let Some(port) = toml.server.port {
        config.server.port = port;
    }
    if let Some(max) = toml.server.max_connections {
        config.server.max_connections = max;
    }
    if let Some(capacity) = toml.server.session_channel_capacity {
        config.server.session_channel_capacity = capacity;
    }

    if let Some(gap) = toml.animator.info_cycle_gap_ms {
        config.animator.info_cycle_gap = Duration::from_millis(gap);
    }
    if let Some(capacity) = toml.animator.event_capacity {
        config.animator.event_capacity = capacity;
    }

    if let Some(ref driver) = toml.device.driver {
        config.device.driver = driver.clone();
    }
    if let Some(step) = toml.device.sim_step_ms {
        config.device.sim_step = Duration::from_millis(step);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut HutchConfig) {
    if let Ok(addr) = std::env::var("HUTCH_BIND") {
        config.server.bind_address = addr;
        config.source = ConfigSource::Env;
    }
    if let Ok(port) = std::env::var("HUTCH_PORT") {
        if let Ok(p) = port.parse::<u16>() {
            config.server.port = p;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(max) = std::env::var("HUTCH_MAX_CONNECTIONS") {
        if let Ok(n) = max.parse::<usize>() {
            config.server.max_connections = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(gap) = std::env::var("HUTCH_INFO_CYCLE_GAP_MS") {
        if let Ok(ms) = gap.parse::<u64>() {
            config.animator.info_cycle_gap = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(driver) = std::env::var("HUTCH_DEVICE_DRIVER") {
        config.device.driver = driver;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind address override
    pub bind_address: Option<String>,

    /// Port override
    pub port: Option<u16>,

    /// Max connections override
    pub max_connections: Option<usize>,

    /// Device driver override
    pub driver: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_address(mut self, addr: String) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set max connections override
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set device driver override
    #[must_use]
    pub fn with_driver(mut self, driver: String) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut HutchConfig) {
        if self.bind_address.is_some()
            || self.port.is_some()
            || self.max_connections.is_some()
            || self.driver.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref addr) = self.bind_address {
            config.server.bind_address = addr.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max) = self.max_connections {
            config.server.max_connections = max;
        }
        if let Some(ref driver) = self.driver {
            config.device.driver = driver.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
