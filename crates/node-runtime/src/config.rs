//! # Node Configuration
//!
//! Loaded from an optional TOML file, then overridden by `CW_*` environment
//! variables, then validated.
//!
//! ```toml
//! peer_id = "0x8f...e1"
//! snapshot_path = "/var/lib/cw/topology.json"
//! reconcile_interval_secs = 30
//! log_level = "info"
//! json_logs = false
//! dedup_window_secs = 120
//!
//! [launcher]
//! inbound_buffer = 1000
//! stop_timeout_ms = 5000
//! execute_timeout_ms = 30000
//! ```

use cw_02_launcher::LauncherConfig;
use serde::{Deserialize, Serialize};
use shared_types::PeerId;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "CW_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    /// The merged configuration is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity of the local peer.
    pub peer_id: PeerId,
    /// JSON topology snapshot polled for changes.
    pub snapshot_path: PathBuf,
    /// Seconds between snapshot polls.
    pub reconcile_interval_secs: u64,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON log output for containers.
    pub json_logs: bool,
    /// Window in which redelivered messages are dropped.
    pub dedup_window_secs: u64,
    pub launcher: LauncherConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::default(),
            snapshot_path: PathBuf::from("./topology.json"),
            reconcile_interval_secs: 30,
            log_level: "info".to_string(),
            json_logs: false,
            dedup_window_secs: 120,
            launcher: LauncherConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `path` (or defaults), apply process environment overrides,
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `CW_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key, value })
        }

        if let Some(value) = lookup("CW_PEER_ID") {
            self.peer_id = parse("CW_PEER_ID", value)?;
        }
        if let Some(value) = lookup("CW_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("CW_RECONCILE_INTERVAL_SECS") {
            self.reconcile_interval_secs = parse("CW_RECONCILE_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("CW_LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("CW_JSON_LOGS") {
            self.json_logs = parse("CW_JSON_LOGS", value)?;
        }
        if let Some(value) = lookup("CW_DEDUP_WINDOW_SECS") {
            self.dedup_window_secs = parse("CW_DEDUP_WINDOW_SECS", value)?;
        }
        if let Some(value) = lookup("CW_INBOUND_BUFFER") {
            self.launcher.inbound_buffer = parse("CW_INBOUND_BUFFER", value)?;
        }
        if let Some(value) = lookup("CW_STOP_TIMEOUT_MS") {
            self.launcher.stop_timeout_ms = parse("CW_STOP_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("CW_EXECUTE_TIMEOUT_MS") {
            self.launcher.execute_timeout_ms = parse("CW_EXECUTE_TIMEOUT_MS", value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_id == PeerId::default() {
            return Err(ConfigError::Invalid(
                "peer_id must be set (CW_PEER_ID or config file)".to_string(),
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconcile_interval_secs must be positive".to_string(),
            ));
        }
        if self.launcher.inbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "launcher.inbound_buffer must be positive".to_string(),
            ));
        }
        if self.launcher.stop_timeout_ms == 0 || self.launcher.execute_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "launcher timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}
