//! # Configuration Management Module
//!
//! Persistent scanner settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `scan_duration_secs`: Window of a blocking scan (the JSON-returning one)
//! - `background_scan_duration_secs`: Window of a fire-and-forget scan
//! - `connect_scan_timeout_secs`: How long to search for an unknown connect target
//! - `scan_wait_grace_secs`: Extra time a blocked caller waits past the window
//! - `scan_queue_timeout_secs`: How long a blocked caller waits for a busy adapter
//! - `unnamed_placeholder`: Name reported for devices that advertise none
//! - `named_only`: Leave nameless devices out of scan results
//! - `subscribe_notifications` / `read_characteristics`: GATT actions after connecting
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/blescan/config.toml
//! - Linux: ~/.config/blescan/config.toml
//! - Windows: %APPDATA%\blescan\config.toml
//!
//! Missing keys fall back to their defaults, so a hand-edited file only
//! needs the settings it changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan_duration_secs: u64,
    pub background_scan_duration_secs: u64,
    pub connect_scan_timeout_secs: u64,
    pub scan_wait_grace_secs: u64,
    pub scan_queue_timeout_secs: u64,
    pub unnamed_placeholder: String,
    pub named_only: bool,
    pub subscribe_notifications: bool,
    pub read_characteristics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_duration_secs: 5,
            background_scan_duration_secs: 20,
            connect_scan_timeout_secs: 10,
            scan_wait_grace_secs: 1,
            // Long enough to sit out a background scan plus a connect search
            scan_queue_timeout_secs: 30,
            unnamed_placeholder: "Unnamed".to_string(),
            named_only: false,
            subscribe_notifications: true,
            read_characteristics: true,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blescan")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Load config, falling back to defaults when the file is unusable
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    pub fn background_scan_duration(&self) -> Duration {
        Duration::from_secs(self.background_scan_duration_secs)
    }

    pub fn connect_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_scan_timeout_secs)
    }

    /// How long a blocked caller waits for its scan to get the adapter
    pub fn scan_queue_wait(&self) -> Duration {
        Duration::from_secs(self.scan_queue_timeout_secs)
    }

    /// How long a blocked caller waits for a started scan of `window` to report back
    pub fn scan_wait(&self, window: Duration) -> Duration {
        window + Duration::from_secs(self.scan_wait_grace_secs)
    }
}
