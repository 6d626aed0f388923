//! Persistent user settings for Imprint
//!
//! Settings are stored in a TOML configuration file at:
//! - Linux/macOS: `~/.config/imprint/imprint_config.toml`
//! - Windows: `%APPDATA%\imprint\imprint_config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [io]
//! chunk_size = "1M"
//! max_retries = 5
//! retry_base_timeout_ms = 100
//!
//! [progress]
//! interval_ms = 333
//!
//! [device]
//! verify = true
//! unmount_on_success = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    Config, CHUNK_SIZE, DEFAULT_MAX_RETRIES, PROGRESS_EMISSION_INTERVAL, RETRY_BASE_TIMEOUT,
};

/// Configuration file name
const CONFIG_FILE_NAME: &str = "imprint_config.toml";

/// Application name for config directory
const APP_NAME: &str = "imprint";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Stream I/O settings
    pub io: IoSettings,

    /// Progress reporting settings
    pub progress: ProgressSettings,

    /// Device write settings
    pub device: DeviceSettings,
}

/// Settings for stream I/O
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IoSettings {
    /// Chunk size (e.g., "64K", "1M")
    pub chunk_size: String,

    /// Retries for a transient device error
    pub max_retries: u32,

    /// Backoff unit between retries, in milliseconds
    pub retry_base_timeout_ms: u64,
}

/// Settings for progress reporting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressSettings {
    /// Interval between progress events, in milliseconds
    pub interval_ms: u64,
}

/// Settings for writing to devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceSettings {
    /// Verify writes by default
    pub verify: bool,

    /// Unmount the device once the write succeeded
    pub unmount_on_success: bool,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            chunk_size: format!("{}K", CHUNK_SIZE / 1024),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_timeout_ms: RETRY_BASE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            interval_ms: PROGRESS_EMISSION_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            verify: true,
            unmount_on_success: true,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Runtime configuration described by these settings
    pub fn to_config(&self) -> Result<Config, SettingsError> {
        let chunk_size = parse_size(&self.io.chunk_size)?;
        let chunk_size = usize::try_from(chunk_size)
            .map_err(|_| SettingsError::InvalidSize(self.io.chunk_size.clone()))?;

        let config = Config::new()
            .chunk_size(chunk_size)
            .max_retries(self.io.max_retries)
            .retry_base_timeout(Duration::from_millis(self.io.retry_base_timeout_ms))
            .progress_interval(Duration::from_millis(self.progress.interval_ms));
        config
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

/// Parse a human-readable size ("512", "64K", "1M", "2G")
pub fn parse_size(s: &str) -> Result<u64, SettingsError> {
    let s = s.trim();
    let invalid = || SettingsError::InvalidSize(s.to_string());

    let split_pos = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(split_pos);

    let num: u64 = num_str.trim().parse().map_err(|_| invalid())?;
    let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    match num.checked_mul(multiplier) {
        Some(0) | None => Err(invalid()),
        Some(size) => Ok(size),
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// A size value could not be parsed
    #[error("Invalid size: {0:?} (expected e.g. 512, 64K, 1M)")]
    InvalidSize(String),

    /// Settings produce an unusable configuration
    #[error("Invalid settings: {0}")]
    Invalid(String),
}
