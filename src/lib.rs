//! # grblstream
//!
//! Streams G-code to GRBL controllers using character-counting flow
//! control, and reads and writes the controller's `$n` firmware settings.
//!
//! ## Architecture
//!
//! grblstream is organized as a workspace with multiple crates:
//!
//! 1. **grblstream-core** - Error taxonomy, axis and unit types, setting value encoding
//! 2. **grblstream-communication** - Connection trait, serial transport, command streamer, GRBL settings store
//! 3. **grblstream-settings** - Configuration file handling
//! 4. **grblstream** - Command-line binary that integrates all crates

pub use grblstream_communication::firmware;

pub use grblstream_core::{
    Axis, ConnectionError, Error, FirmwareError, Result, StreamError, Units,
};

pub use grblstream_communication::{
    list_ports, CommandState, CommandStreamer, CommunicatorEvent, CommunicatorListener,
    CommunicatorListenerHandle, Connection, FirmwareSetting, FirmwareSettingsListener,
    GcodeCommand, GrblFirmwareSettings, SerialConnection, SerialPortInfo, StreamState,
    StreamerConfig,
};

pub use grblstream_settings::{Config, SettingsError};

use std::path::Path;

/// Initialize logging
///
/// Uses `level` as the filter when given, otherwise `RUST_LOG`, otherwise
/// `info`. Output goes to stderr so command output stays on stdout.
pub fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Streamer configuration derived from the configuration file
pub fn streamer_config(config: &Config) -> StreamerConfig {
    StreamerConfig {
        max_buffer: config.streaming.max_buffer,
        pause_on_error: config.streaming.pause_on_error,
    }
}

/// Lines of a G-code program worth sending
///
/// Drops `;` comments, whole-line `(...)` comments and blank lines, and
/// trims surrounding whitespace.
pub fn program_lines(source: &str) -> Vec<String> {
    source
        .lines()
        .map(|line| match line.find(';') {
            Some(index) => &line[..index],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !(line.starts_with('(') && line.ends_with(')')))
        .map(str::to_string)
        .collect()
}

/// Read a G-code program from disk
pub fn read_program(path: &Path) -> Result<Vec<String>> {
    let source = std::fs::read_to_string(path)?;
    Ok(program_lines(&source))
}

/// Parse a `KEY=VALUE` settings assignment, adding the `$` prefix if absent
pub fn parse_assignment(input: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", input))?;

    let number = key.trim().trim_start_matches('$');
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{}' is not a setting key", key.trim()));
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing value for ${}", number));
    }

    Ok((format!("${}", number), value.to_string()))
}
