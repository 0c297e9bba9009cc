//! Configuration module for the capture station
//!
//! Supports loading configuration from a TOML file.
//! Configuration is stored in a standard location:
//! - Windows: %APPDATA%\capture_station\config.toml
//! - Linux: ~/.config/capture_station/config.toml
//! - macOS: ~/Library/Application Support/capture_station/config.toml

use crate::core::retry::RetryPolicy;
use crate::device::events::EventPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Application name used for config directory
const APP_NAME: &str = "capture_station";

/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the standard configuration directory for the application.
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Get the standard configuration file path.
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Initialize the configuration file if it doesn't exist.
///
/// Creates the config directory and writes the default config template.
/// Returns the path to the config file.
pub fn init_config() -> Result<PathBuf, ConfigError> {
    let config_dir = get_config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
    fs::create_dir_all(&config_dir)
        .map_err(|e| ConfigError::WriteError(config_dir.clone(), e.to_string()))?;

    let config_path = config_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        fs::write(&config_path, Config::generate_default_config())
            .map_err(|e| ConfigError::WriteError(config_path.clone(), e.to_string()))?;
    }

    Ok(config_path)
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output settings
    pub output: OutputConfig,

    /// Camera connection settings
    pub connection: ConnectionConfig,

    /// Transfer settings
    pub transfer: TransferConfig,

    /// Event classification settings
    pub events: EventPolicy,

    /// Thumbnail settings
    pub thumbnail: ThumbnailConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Output directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Root folder; each part number gets a subfolder
    pub root: PathBuf,
}

/// Camera connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Minimum seconds between connect attempts unless forced
    pub cooldown_secs: u64,

    /// Event pump period in milliseconds
    pub pump_interval_ms: u64,

    /// Minimum milliseconds between two "dispatch failed" log lines
    pub burst_log_interval_ms: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Attempts per driver call before giving up on busy/not-ready
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubles each attempt)
    pub base_delay_ms: u64,

    /// In-memory buffer size when the device does not report a size
    pub default_buffer_bytes: u64,

    /// How long to wait for a disk-backed transfer to show up on disk
    pub fallback_wait_ms: u64,

    /// Poll period while waiting for the disk-backed file
    pub fallback_poll_ms: u64,

    /// Consecutive in-memory failures before going straight to the disk-backed transport
    pub prefer_fallback_after_failures: u32,

    /// Downloads allowed to run at the same time
    pub max_concurrent_downloads: usize,

    /// Extensions (without dot, lowercase) accepted when searching containers
    pub accepted_extensions: Vec<String>,
}

/// Thumbnail configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Generate thumbnails after each capture
    pub enabled: bool,

    /// Longest edge of the thumbnail in pixels
    pub max_edge: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Marker inserted before the extension (`{stem}.{marker}{ext}`)
    pub marker: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log to file
    pub log_to_file: bool,

    /// Log file path
    pub log_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./captures"),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            pump_interval_ms: 100,
            burst_log_interval_ms: 2000,
        }
    }
}

impl ConnectionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    pub fn burst_log_interval(&self) -> Duration {
        Duration::from_millis(self.burst_log_interval_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 75,
            default_buffer_bytes: 10 * 1024 * 1024,
            fallback_wait_ms: 2000,
            fallback_poll_ms: 100,
            prefer_fallback_after_failures: 3,
            max_concurrent_downloads: 4,
            accepted_extensions: ["jpg", "jpeg", "cr2", "cr3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TransferConfig {
    /// Retry policy built from `max_attempts` and `base_delay_ms`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn fallback_wait(&self) -> Duration {
        Duration::from_millis(self.fallback_wait_ms)
    }

    pub fn fallback_poll(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_ms.max(1))
    }

    /// Whether a file name carries one of the accepted image extensions
    pub fn accepts(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.accepted_extensions
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_edge: 300,
            jpeg_quality: 85,
            marker: "thumb".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("./capture_station.log"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./capture_station.toml
    /// 2. ./config.toml
    /// 3. Standard config location
    ///
    /// If no config file is found, returns default configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::get_active_config_path()
            .filter(|p| p.exists())
            .map(Self::load)
            .unwrap_or_else(|| Ok(Self::default()))
    }

    /// The first config file that exists, or the standard location if none does
    pub fn get_active_config_path() -> Option<PathBuf> {
        let local_paths = [
            PathBuf::from("./capture_station.toml"),
            PathBuf::from("./config.toml"),
        ];

        local_paths
            .into_iter()
            .find(|p| p.exists())
            .or_else(get_config_path)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::WriteError(path.as_ref().to_path_buf(), e.to_string()))
    }

    /// Generate a default config file with comments
    pub fn generate_default_config() -> String {
        include_str!("../../config.example.toml").to_string()
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file was not found at the specified path
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    /// Failed to read the configuration file
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, String),
    /// Failed to parse the configuration file (invalid TOML)
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),
    /// Failed to serialize configuration to TOML
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),
    /// Failed to write configuration file
    #[error("Failed to write config file '{}': {}", .0.display(), .1)]
    WriteError(PathBuf, String),
    /// Could not determine config directory
    #[error("Could not determine configuration directory")]
    ConfigDirNotFound,
}
