//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tally/config.toml)
//! 3. Environment variables (TALLY_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "TALLY";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (SQLite cache/queue database)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote backend (REST + auth endpoints)
    #[serde(default)]
    pub api_url: Option<String>,

    /// Tables mirrored locally and refreshed by the snapshot synchronizer
    #[serde(default = "default_synced_tables")]
    pub synced_tables: Vec<String>,

    /// Seconds between periodic sync passes while online
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Maximum rows pulled per table during a snapshot refresh
    #[serde(default = "default_snapshot_row_limit")]
    pub snapshot_row_limit: usize,

    /// Replay attempts before a queued mutation is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Bound on the mutation queue; further offline writes are rejected
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            synced_tables: default_synced_tables(),
            sync_interval_secs: default_sync_interval_secs(),
            snapshot_row_limit: default_snapshot_row_limit(),
            max_retries: default_max_retries(),
            max_queue_len: default_max_queue_len(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TALLY_DATA_DIR, TALLY_API_URL, ...)
    /// 2. Config file (~/.config/tally/config.toml or TALLY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_SYNC_INTERVAL_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.sync_interval_secs = secs;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TALLY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("tally.db")
    }

    /// Interval between periodic sync passes
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
}

fn default_synced_tables() -> Vec<String> {
    ["clients", "sales", "stock", "expenses"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_snapshot_row_limit() -> usize {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_queue_len() -> usize {
    1000
}
