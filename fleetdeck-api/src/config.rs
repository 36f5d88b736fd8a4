//! Configuration management for the fleetdeck API
//!
//! Settings are resolved in this order, later sources winning:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables

use crate::kubernetes::informer::watch::WatchTuning;
use crate::kubernetes::informer::ResourceKind;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetdeckConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Cluster cache tuning
    pub informer: InformerConfig,
    /// Where cluster records come from
    pub directory: DirectoryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Cluster cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InformerConfig {
    /// Default wait for a cache's initial sync
    pub sync_timeout_secs: u64,
    /// First delay between watch retries
    pub backoff_initial_ms: u64,
    /// Upper bound on the delay between watch retries
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// Symmetric jitter applied to each delay, as a fraction of it
    pub backoff_jitter: f64,
    /// Consecutive errors before a kind that never synced is marked failed
    pub failure_threshold: u32,
    /// How long a stop waits for watches before aborting them
    pub stop_grace_secs: u64,
    /// Interval for sweeping caches of deregistered clusters, 0 disables
    pub sweep_interval_secs: u64,
    /// Watch Argo Rollouts when the CRD is installed
    pub track_rollouts: bool,
    /// Kinds that must sync before a cache counts as ready
    pub required_kinds: Vec<ResourceKind>,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            backoff_jitter: 0.1,
            failure_threshold: 3,
            stop_grace_secs: 5,
            sweep_interval_secs: 60,
            track_rollouts: true,
            required_kinds: vec![
                ResourceKind::Node,
                ResourceKind::Pod,
                ResourceKind::Deployment,
            ],
        }
    }
}

impl InformerConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn watch_tuning(&self) -> WatchTuning {
        WatchTuning {
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            backoff_multiplier: self.backoff_multiplier,
            backoff_jitter: self.backoff_jitter,
            failure_threshold: self.failure_threshold,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_kinds.is_empty() {
            return Err(ConfigError::Validation(
                "At least one required kind must be configured".to_string(),
            ));
        }
        if let Some(kind) = self.required_kinds.iter().find(|k| k.is_optional()) {
            return Err(ConfigError::Validation(format!(
                "{} is optional and cannot be required",
                kind
            )));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::Validation(
                "Backoff must start above 0 and not exceed its maximum".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Validation(
                "Backoff jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "Failure threshold cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cluster directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// TOML file listing `[[clusters]]`
    pub clusters_file: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            clusters_file: PathBuf::from("/etc/fleetdeck/clusters.toml"),
        }
    }
}

impl FleetdeckConfig {
    /// Load configuration from the first config file found plus environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("FLEETDECK_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/fleetdeck/config.toml")),
            Some(PathBuf::from("./fleetdeck.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FLEETDECK_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("FLEETDECK_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(level) = std::env::var("FLEETDECK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("FLEETDECK_LOG_DIR") {
            self.logging.file_path = Some(dir);
        }

        if let Ok(path) = std::env::var("FLEETDECK_CLUSTERS_FILE") {
            self.directory.clusters_file = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("FLEETDECK_SYNC_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.informer.sync_timeout_secs = secs;
            }
        }
        if let Ok(secs) = std::env::var("FLEETDECK_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                self.informer.sweep_interval_secs = secs;
            }
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }
        self.informer.validate()
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Config validation failed: {0}")]
    Validation(String),
}
