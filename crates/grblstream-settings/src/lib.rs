//! grblstream Settings Crate
//!
//! Handles the application configuration file: connection defaults,
//! streaming options and firmware write behavior.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, Config, ConnectionSettings, FirmwareSettings, StreamingSettings,
    CONFIG_DIR_NAME, CONFIG_FILE_NAME,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
