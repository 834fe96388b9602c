//! Firmware settings model
//!
//! A [`FirmwareSetting`] is one `$n` entry as reported by the controller.
//! Subscribers implement [`FirmwareSettingsListener`] to observe cache
//! updates.

use crate::firmware::grbl::response_parser::SettingReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A firmware setting parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareSetting {
    /// Setting key including the `$` prefix
    pub key: String,
    /// Current value as a decimal string
    pub value: String,
    /// Units, empty if not reported
    #[serde(default)]
    pub units: String,
    /// Setting description, empty if not reported
    #[serde(default)]
    pub description: String,
    /// Short description, empty if not reported
    #[serde(default)]
    pub short_description: String,
}

impl FirmwareSetting {
    /// Create a setting without metadata
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            units: String::new(),
            description: String::new(),
            short_description: String::new(),
        }
    }

    /// Create a setting with all metadata
    pub fn with_details(
        key: impl Into<String>,
        value: impl Into<String>,
        units: impl Into<String>,
        description: impl Into<String>,
        short_description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            units: units.into(),
            description: description.into(),
            short_description: short_description.into(),
        }
    }

    /// Copy of this setting carrying a different value
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..self.clone()
        }
    }

    /// Numeric part of the key (`$130` -> 130)
    pub fn key_number(&self) -> Option<u32> {
        self.key.strip_prefix('$')?.parse().ok()
    }
}

impl From<SettingReport> for FirmwareSetting {
    fn from(report: SettingReport) -> Self {
        Self {
            key: report.key,
            value: report.value,
            units: report.units.unwrap_or_default(),
            description: report.description.unwrap_or_default(),
            short_description: report.short_description.unwrap_or_default(),
        }
    }
}

impl fmt::Display for FirmwareSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

/// Listener for firmware setting updates
pub trait FirmwareSettingsListener: Send + Sync {
    /// Called after a setting in the cache has been created or overwritten
    fn on_updated_firmware_setting(&self, setting: &FirmwareSetting);
}
