//! Configuration management for peerxfer.
//!
//! This module handles loading, saving, and managing peerxfer configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/peerxfer/config.toml` |
//! | macOS | `~/Library/Application Support/com.peerxfer.peerxfer/config.toml` |
//! | Windows | `%APPDATA%\peerxfer\peerxfer\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerxfer_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Downloads go to: {}", config.transfer.download_dir().display());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for peerxfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transfer settings
    pub transfer: TransferConfig,
    /// Progress display settings
    pub display: DisplayConfig,
    /// Loopback transport settings
    pub loopback: LoopbackConfig,
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory incoming files are written to
    pub download_dir: Option<PathBuf>,
    /// Minimum time between two throughput samples
    #[serde(with = "humantime_serde")]
    pub speed_window: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            speed_window: Duration::from_secs(1),
        }
    }
}

impl TransferConfig {
    /// Resolve the directory incoming files are written to.
    ///
    /// Falls back to the user's download directory, then to the current
    /// directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(|| {
                directories::UserDirs::new()
                    .and_then(|dirs| dirs.download_dir().map(std::path::Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Progress display options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Width of the progress bar in characters
    pub bar_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { bar_width: 20 }
    }
}

/// Loopback transport options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Largest chunk the link requests at once
    pub chunk_size: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(&path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peerxfer", "peerxfer")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
