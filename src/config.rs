//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Which physical interface a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Udp,
    Usb,
    Serial,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub acquisition: AcquisitionConfig,
}

/// Device connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub interface: Interface,
    /// Device IP address (UDP interface only).
    pub address: String,
    /// Which matching USB device to open when several are attached.
    #[serde(default)]
    pub usb_index: usize,
    /// Receive timeout in milliseconds (default: 3000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Acquisition and configuration-transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Configuration file to push on `load` (optional).
    pub config_file: Option<PathBuf>,
    /// True: unit takes coarse+fine gain; false: total gain.
    #[serde(default = "default_coarse_fine")]
    pub send_coarse_fine_gain: bool,
}

fn default_coarse_fine() -> bool {
    true
}

impl AppConfig {
    /// Get config file path (same directory as executable).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dppconsole.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.interface == Interface::Udp {
            if self.connection.address.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Device address cannot be empty for the UDP interface".to_string(),
                ));
            }
            if self.connection.address.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "Device address '{}' is not a valid IP address",
                    self.connection.address
                )));
            }
        }
        if self.connection.timeout_ms < 100 {
            return Err(ConfigError::Validation(
                "Receive timeout must be at least 100 ms".to_string(),
            ));
        }
        if self.connection.timeout_ms > 60_000 {
            return Err(ConfigError::Validation(
                "Receive timeout cannot exceed 60 seconds".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            interface: Interface::Udp,
            address: "192.168.0.239".to_string(),
            usb_index: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            send_coarse_fine_gain: default_coarse_fine(),
        }
    }
}
