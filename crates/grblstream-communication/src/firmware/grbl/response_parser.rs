//! GRBL Response Parser
//!
//! Classifies lines received from a GRBL controller. Only `ok` and
//! `error` lines acknowledge a command; every other kind is informational.

use super::error_decoder::{alarm_description, error_description};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GRBL response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error acknowledgment; `code` is set for numeric GRBL 1.1 errors
    Error {
        /// Numeric error code, if the controller sent one
        code: Option<u8>,
        /// Text after the `error` prefix
        message: String,
    },
    /// Alarm report
    Alarm {
        /// Numeric alarm code, if the controller sent one
        code: Option<u8>,
        /// Text after the `ALARM` prefix
        message: String,
    },
    /// Status report (`<...>`), without the angle brackets
    Status(String),
    /// Setting report (`$n=value`, optionally followed by `(description)`)
    Setting(SettingReport),
    /// Version banner (`Grbl 1.1h ['$' for help]`)
    Version(String),
    /// Bracketed feedback message (`[MSG:...]`, `[GC:...]`)
    Feedback(String),
    /// Any other text
    Message(String),
}

/// A setting as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingReport {
    /// Setting key including the `$` prefix (e.g. `$100`)
    pub key: String,
    /// Reported value
    pub value: String,
    /// Text in parentheses after the value (GRBL 0.9 style)
    pub description: Option<String>,
    /// Text before the first comma of the description
    pub short_description: Option<String>,
    /// Text after the last comma of the description
    pub units: Option<String>,
}

/// Whether a line acknowledges the oldest outstanding command
pub fn is_ok_error_response(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    lower == "ok" || lower.starts_with("error")
}

fn split_code(rest: &str) -> (Option<u8>, String) {
    let message = rest.trim_start_matches(':').trim().to_string();
    (message.parse::<u8>().ok(), message)
}

impl GrblResponse {
    /// Parse a GRBL response line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let lower = line.to_ascii_lowercase();

        if lower == "ok" {
            return Self::Ok;
        }

        if lower.starts_with("error") {
            let (code, message) = split_code(&line["error".len()..]);
            return Self::Error { code, message };
        }

        if lower.starts_with("alarm") {
            let (code, message) = split_code(&line["alarm".len()..]);
            return Self::Alarm { code, message };
        }

        if line.starts_with('<') && line.ends_with('>') && line.len() >= 2 {
            return Self::Status(line[1..line.len() - 1].to_string());
        }

        if let Some(report) = parse_setting_report(line) {
            return Self::Setting(report);
        }

        if line.starts_with("Grbl ") {
            return Self::Version(line.to_string());
        }

        if line.starts_with('[') && line.ends_with(']') {
            return Self::Feedback(line.to_string());
        }

        Self::Message(line.to_string())
    }

    /// Whether this response acknowledges a command
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, Self::Ok | Self::Error { .. })
    }
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error { code, message } => {
                match code.and_then(|c| error_description(c).map(|d| (c, d))) {
                    Some((c, description)) => write!(f, "error:{} - {}", c, description),
                    None if message.is_empty() => write!(f, "error"),
                    None => write!(f, "error: {}", message),
                }
            }
            Self::Alarm { code, message } => {
                match code.and_then(|c| alarm_description(c).map(|d| (c, d))) {
                    Some((c, description)) => write!(f, "ALARM:{} - {}", c, description),
                    None => write!(f, "ALARM: {}", message),
                }
            }
            Self::Status(status) => write!(f, "<{}>", status),
            Self::Setting(report) => write!(f, "{}={}", report.key, report.value),
            Self::Version(version) => write!(f, "{}", version),
            Self::Feedback(text) | Self::Message(text) => write!(f, "{}", text),
        }
    }
}

/// Parse a `$n=value` or `$n=value (description, units)` line
pub fn parse_setting_report(line: &str) -> Option<SettingReport> {
    let line = line.trim();
    let rest = line.strip_prefix('$')?;
    let (number, remainder) = rest.split_once('=')?;

    let number = number.trim();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let remainder = remainder.trim();
    let (value, description) = match remainder.find('(') {
        Some(open) if remainder.ends_with(')') => {
            let text = remainder[open + 1..remainder.len() - 1].trim();
            (remainder[..open].trim(), Some(text.to_string()))
        }
        _ => (remainder, None),
    };

    if value.is_empty() {
        return None;
    }

    let (short_description, units) = match description.as_deref() {
        Some(text) => match (text.split_once(','), text.rsplit_once(',')) {
            (Some((short, _)), Some((_, units))) => (
                Some(short.trim().to_string()),
                Some(units.trim().to_string()),
            ),
            _ => (Some(text.to_string()), None),
        },
        None => (None, None),
    };

    Some(SettingReport {
        key: format!("${}", number),
        value: value.to_string(),
        description,
        short_description,
        units,
    })
}
