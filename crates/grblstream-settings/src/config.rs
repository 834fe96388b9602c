//! Configuration file handling for grblstream
//!
//! Supports JSON and TOML files, chosen by extension. The default file
//! lives in the platform configuration directory.
//!
//! Configuration is organized into sections:
//! - Connection settings (port, baud rate, timeout)
//! - Streaming settings (controller buffer, single step, pause on error)
//! - Firmware settings (write confirmation timeout)

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory created under the platform config directory
pub const CONFIG_DIR_NAME: &str = "grblstream";

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name; empty means none configured
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            timeout_ms: 5000,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Controller receive buffer in bytes
    pub max_buffer: usize,
    /// Send one command at a time
    pub single_step: bool,
    /// Pause when the controller rejects a command
    pub pause_on_error: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            max_buffer: 127,
            single_step: false,
            pause_on_error: false,
        }
    }
}

/// Firmware settings write behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareSettings {
    /// How long a settings write waits for confirmation, in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 3000,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
    /// Firmware settings
    pub firmware: FirmwareSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> ConfigResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

/// Location of the default configuration file
pub fn default_config_path() -> ConfigResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| {
            ConfigError::UnsupportedPlatform("no configuration directory available".to_string())
        })
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the given file, or the default file if it exists, or defaults
    ///
    /// An explicitly named file must exist.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match default_config_path() {
            Ok(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
            ConfigError::ValueOutOfRange {
                key: key.to_string(),
                value: value.to_string(),
            }
        }

        if self.connection.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", self.connection.baud_rate));
        }

        if self.connection.timeout_ms == 0 {
            return Err(out_of_range("connection.timeout_ms", self.connection.timeout_ms));
        }

        if self.streaming.max_buffer == 0 {
            return Err(out_of_range("streaming.max_buffer", self.streaming.max_buffer));
        }

        if self.firmware.write_timeout_ms == 0 {
            return Err(out_of_range(
                "firmware.write_timeout_ms",
                self.firmware.write_timeout_ms,
            ));
        }

        Ok(())
    }

    /// Configured port, if any
    pub fn port(&self) -> Option<&str> {
        Some(self.connection.port.as_str()).filter(|port| !port.is_empty())
    }

    /// Settings write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.firmware.write_timeout_ms)
    }
}
