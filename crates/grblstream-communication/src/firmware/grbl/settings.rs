//! GRBL firmware settings store
//!
//! Keeps a cache of the controller's `$n` settings, populated only from
//! what the controller reports, and writes new values through a private
//! [`CommandStreamer`]. A write blocks until the controller confirms the
//! new value, rejects it, the connection closes, or the write timeout
//! elapses.

use crate::communication::{
    CommandState, CommandStreamer, CommunicatorListener, CommunicatorListenerHandle, Connection,
    GcodeCommand, ListenerHandle, ListenerRegistry, StreamerConfig,
};
use crate::firmware::grbl::response_parser::parse_setting_report;
use crate::firmware::settings::{FirmwareSetting, FirmwareSettingsListener};
use grblstream_core::{
    format_setting_decimal, parse_setting_number, Axis, FirmwareError, Result, Units,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long a write waits for the controller to confirm the new value
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Invert step direction mask, one bit per axis
pub const KEY_INVERT_DIRECTION: &str = "$3";
/// Invert limit pins
pub const KEY_INVERT_LIMIT_PINS: &str = "$5";
/// Report positions in inches
pub const KEY_REPORTING_UNITS_IN_INCHES: &str = "$13";
/// Soft limits enabled
pub const KEY_SOFT_LIMITS_ENABLED: &str = "$20";
/// Hard limits enabled
pub const KEY_HARD_LIMITS_ENABLED: &str = "$21";
/// Homing cycle enabled
pub const KEY_HOMING_ENABLED: &str = "$22";
/// Homing direction invert mask, one bit per axis
pub const KEY_HOMING_INVERT_DIRECTION: &str = "$23";

fn steps_per_mm_key(axis: Axis) -> &'static str {
    match axis {
        Axis::X => "$100",
        Axis::Y => "$101",
        Axis::Z => "$102",
    }
}

fn soft_limit_key(axis: Axis) -> &'static str {
    match axis {
        Axis::X => "$130",
        Axis::Y => "$131",
        Axis::Z => "$132",
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        "0"
    }
}

/// Whether a reported value matches a written one, textually or numerically
fn same_value(reported: &str, written: &str) -> bool {
    if reported == written {
        return true;
    }
    matches!(
        (parse_setting_number(reported), parse_setting_number(written)),
        (Some(a), Some(b)) if a == b
    )
}

fn persist_failure(key: &str, reason: impl Into<String>) -> FirmwareError {
    FirmwareError::SettingsPersistFailure {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Bookkeeping that blocked writers wait on
#[derive(Debug, Default)]
struct WriteSync {
    /// Bumped every time a key is written into the cache
    revisions: HashMap<String, u64>,
    /// Rejections recorded for keys with a write outstanding
    failures: HashMap<String, String>,
    /// Bumped every time the connection closes
    close_generation: u64,
}

impl WriteSync {
    fn revision(&self, key: &str) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }
}

/// State shared between the store and its streamer listener
struct SettingsState {
    cache: RwLock<HashMap<String, FirmwareSetting>>,
    sync: Mutex<WriteSync>,
    changed: Condvar,
    listeners: ListenerRegistry<dyn FirmwareSettingsListener>,
}

impl SettingsState {
    fn apply(&self, setting: FirmwareSetting) {
        trace!("Setting update {}", setting);
        self.cache
            .write()
            .insert(setting.key.clone(), setting.clone());
        {
            let mut sync = self.sync.lock();
            *sync.revisions.entry(setting.key.clone()).or_insert(0) += 1;
        }
        self.changed.notify_all();

        for listener in self.listeners.snapshot() {
            listener.on_updated_firmware_setting(&setting);
        }
    }

    fn fail(&self, key: &str, reason: String) {
        warn!("Write of {} failed: {}", key, reason);
        self.sync.lock().failures.insert(key.to_string(), reason);
        self.changed.notify_all();
    }

    fn connection_closed(&self) {
        self.sync.lock().close_generation += 1;
        self.changed.notify_all();
    }

    fn cached(&self, key: &str) -> Option<FirmwareSetting> {
        self.cache.read().get(key).cloned()
    }
}

/// Streamer listener feeding controller reports into the cache
struct ControllerReports {
    state: Arc<SettingsState>,
}

impl ControllerReports {
    /// The `$n=value` write carried by a command, if any
    fn setting_write(command: &GcodeCommand) -> Option<(String, String)> {
        parse_setting_report(command.trimmed()).map(|write| (write.key, write.value))
    }
}

impl CommunicatorListener for ControllerReports {
    fn on_raw_response(&self, response: &str) {
        if let Some(report) = parse_setting_report(response) {
            self.state.apply(report.into());
        }
    }

    fn on_command_complete(&self, command: &GcodeCommand) {
        let Some((key, value)) = Self::setting_write(command) else {
            return;
        };

        match command.state {
            CommandState::Ok => {
                let setting = match self.state.cached(&key) {
                    Some(existing) => existing.with_value(value),
                    None => FirmwareSetting::new(key, value),
                };
                self.state.apply(setting);
            }
            CommandState::Error => {
                let response = command.response.as_deref().unwrap_or("error");
                self.state
                    .fail(&key, format!("controller answered '{}'", response));
            }
            _ => {}
        }
    }

    fn on_command_skipped(&self, command: &GcodeCommand) {
        if let Some((key, _)) = Self::setting_write(command) {
            self.state
                .fail(&key, "command was not transmitted".to_string());
        }
    }

    fn on_connection_closed(&self) {
        self.state.connection_closed();
    }
}

/// GRBL firmware settings store
///
/// Owns a private streamer; open the port through [`Self::streamer`].
/// Writes must not be issued from inside a streamer or settings listener
/// callback, since the confirmation arrives on that same path.
pub struct GrblFirmwareSettings {
    streamer: CommandStreamer,
    state: Arc<SettingsState>,
    reports_handle: CommunicatorListenerHandle,
    write_lock: Mutex<()>,
    write_timeout: Duration,
}

impl GrblFirmwareSettings {
    /// Create a store over a connection with default streaming settings
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::with_config(connection, StreamerConfig::default(), DEFAULT_WRITE_TIMEOUT)
    }

    /// Create a store with explicit streamer configuration and write timeout
    pub fn with_config(
        connection: Arc<dyn Connection>,
        config: StreamerConfig,
        write_timeout: Duration,
    ) -> Self {
        let streamer = CommandStreamer::with_config(connection, config);
        let state = Arc::new(SettingsState {
            cache: RwLock::new(HashMap::new()),
            sync: Mutex::new(WriteSync::default()),
            changed: Condvar::new(),
            listeners: ListenerRegistry::new(),
        });
        let reports_handle = streamer.add_listener(Arc::new(ControllerReports {
            state: Arc::clone(&state),
        }));

        Self {
            streamer,
            state,
            reports_handle,
            write_lock: Mutex::new(()),
            write_timeout,
        }
    }

    /// The streamer this store writes through
    pub fn streamer(&self) -> &CommandStreamer {
        &self.streamer
    }

    /// Write timeout
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Register a listener for setting updates
    pub fn add_listener(&self, listener: Arc<dyn FirmwareSettingsListener>) -> ListenerHandle {
        self.state.listeners.add_listener(listener)
    }

    /// Unregister a settings listener
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.state.listeners.remove_listener(handle)
    }

    /// Ask the controller to report every setting
    pub fn refresh(&self) {
        debug!("Requesting settings report");
        self.streamer.enqueue("$$");
    }

    /// Record a setting reported by the controller
    ///
    /// Overwrites any cached entry, releases writers waiting on the key
    /// and notifies settings listeners.
    pub fn on_updated_firmware_setting(&self, setting: FirmwareSetting) {
        self.state.apply(setting);
    }

    /// Cached setting for a key
    pub fn get_setting(&self, key: &str) -> Option<FirmwareSetting> {
        self.state.cached(key)
    }

    /// Every cached setting ordered by numeric key
    pub fn get_all_settings(&self) -> Vec<FirmwareSetting> {
        let mut settings: Vec<FirmwareSetting> = self.state.cache.read().values().cloned().collect();
        settings.sort_by(|a, b| {
            (a.key_number().is_none(), a.key_number(), &a.key)
                .cmp(&(b.key_number().is_none(), b.key_number(), &b.key))
        });
        settings
    }

    /// Write a setting and wait for the controller to confirm it
    ///
    /// Returns the cached setting unchanged when it already holds `value`.
    pub fn set_value(&self, key: &str, value: &str) -> Result<FirmwareSetting> {
        let _write = self.write_lock.lock();

        let existing = self
            .state
            .cached(key)
            .ok_or_else(|| FirmwareError::SettingNotFound {
                key: key.to_string(),
            })?;

        if existing.value == value {
            trace!("{} already set to {}", key, value);
            return Ok(existing);
        }

        if !self.streamer.is_open() {
            return Err(persist_failure(key, "connection is not open").into());
        }

        let (mut seen_revision, start_generation) = {
            let mut sync = self.state.sync.lock();
            sync.failures.remove(key);
            (sync.revision(key), sync.close_generation)
        };

        debug!("Writing {}={}", key, value);
        self.streamer.enqueue(format!("{}={}", key, value));

        // Only an update carrying the requested value confirms the write;
        // a `$$` report still holding the old value keeps us waiting.
        let deadline = Instant::now() + self.write_timeout;
        let mut timed_out = false;
        let mut sync = self.state.sync.lock();
        loop {
            if let Some(reason) = sync.failures.remove(key) {
                return Err(persist_failure(key, reason).into());
            }
            if sync.revision(key) > seen_revision {
                seen_revision = sync.revision(key);
                if let Some(setting) = self
                    .state
                    .cached(key)
                    .filter(|setting| same_value(&setting.value, value))
                {
                    return Ok(setting);
                }
                trace!("{} updated without the written value yet", key);
            }
            if sync.close_generation != start_generation {
                return Err(persist_failure(key, "connection closed").into());
            }
            if timed_out {
                return Err(persist_failure(
                    key,
                    format!(
                        "no confirmation within {} ms",
                        self.write_timeout.as_millis()
                    ),
                )
                .into());
            }
            timed_out = self.state.changed.wait_until(&mut sync, deadline).timed_out();
        }
    }

    /// Write a numeric setting using up to three fractional digits
    ///
    /// A no-op when the cached value is numerically equal to `value`.
    /// Fails with a parse error when the cached value is not a number.
    pub fn set_numeric_value(&self, key: &str, value: f64) -> Result<FirmwareSetting> {
        let current = self.numeric_value(key)?;

        if !value.is_finite() {
            return Err(persist_failure(key, format!("{} is not a finite number", value)).into());
        }

        if current == value {
            return self.state.cached(key).ok_or_else(|| {
                FirmwareError::SettingNotFound {
                    key: key.to_string(),
                }
                .into()
            });
        }

        self.set_value(key, &format_setting_decimal(value))
    }

    fn numeric_value(&self, key: &str) -> Result<f64> {
        let setting = self
            .state
            .cached(key)
            .ok_or_else(|| FirmwareError::SettingNotFound {
                key: key.to_string(),
            })?;

        parse_setting_number(&setting.value).ok_or_else(|| {
            FirmwareError::SettingsParseError {
                key: key.to_string(),
                value: setting.value,
            }
            .into()
        })
    }

    fn boolean_value(&self, key: &str) -> Result<bool> {
        self.state
            .cached(key)
            .map(|setting| setting.value == "1")
            .ok_or_else(|| {
                FirmwareError::SettingNotFound {
                    key: key.to_string(),
                }
                .into()
            })
    }

    fn mask(&self, key: &str) -> u32 {
        self.state
            .cached(key)
            .and_then(|setting| setting.value.trim().parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn set_mask_bit(&self, key: &str, axis: Axis, enabled: bool) -> Result<()> {
        let mask = if enabled {
            self.mask(key) | axis.mask_bit()
        } else {
            self.mask(key) & !axis.mask_bit()
        };
        self.set_value(key, &mask.to_string()).map(|_| ())
    }

    /// Whether step direction is inverted for an axis
    pub fn is_invert_direction(&self, axis: Axis) -> bool {
        self.mask(KEY_INVERT_DIRECTION) & axis.mask_bit() != 0
    }

    pub fn set_invert_direction(&self, axis: Axis, inverted: bool) -> Result<()> {
        self.set_mask_bit(KEY_INVERT_DIRECTION, axis, inverted)
    }

    /// Whether the homing direction is inverted for an axis
    pub fn is_homing_direction_inverted(&self, axis: Axis) -> bool {
        self.mask(KEY_HOMING_INVERT_DIRECTION) & axis.mask_bit() != 0
    }

    pub fn set_homing_direction_inverted(&self, axis: Axis, inverted: bool) -> Result<()> {
        self.set_mask_bit(KEY_HOMING_INVERT_DIRECTION, axis, inverted)
    }

    /// Steps per millimeter for an axis
    pub fn steps_per_millimeter(&self, axis: Axis) -> Result<f64> {
        self.numeric_value(steps_per_mm_key(axis))
    }

    /// Maximum travel for an axis
    pub fn soft_limit(&self, axis: Axis) -> Result<f64> {
        self.numeric_value(soft_limit_key(axis))
    }

    pub fn set_soft_limit(&self, axis: Axis, limit: f64) -> Result<()> {
        self.set_numeric_value(soft_limit_key(axis), limit).map(|_| ())
    }

    pub fn is_soft_limits_enabled(&self) -> Result<bool> {
        self.boolean_value(KEY_SOFT_LIMITS_ENABLED)
    }

    pub fn set_soft_limits_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(KEY_SOFT_LIMITS_ENABLED, flag(enabled)).map(|_| ())
    }

    pub fn is_hard_limits_enabled(&self) -> Result<bool> {
        self.boolean_value(KEY_HARD_LIMITS_ENABLED)
    }

    pub fn set_hard_limits_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(KEY_HARD_LIMITS_ENABLED, flag(enabled)).map(|_| ())
    }

    pub fn is_homing_enabled(&self) -> Result<bool> {
        self.boolean_value(KEY_HOMING_ENABLED)
    }

    pub fn set_homing_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(KEY_HOMING_ENABLED, flag(enabled)).map(|_| ())
    }

    /// Whether the limit pins are inverted
    pub fn is_hard_limits_inverted(&self) -> Result<bool> {
        self.boolean_value(KEY_INVERT_LIMIT_PINS)
    }

    pub fn set_hard_limits_inverted(&self, inverted: bool) -> Result<()> {
        self.set_value(KEY_INVERT_LIMIT_PINS, flag(inverted)).map(|_| ())
    }

    /// Units the controller reports positions in
    pub fn reporting_units(&self) -> Units {
        self.state
            .cached(KEY_REPORTING_UNITS_IN_INCHES)
            .map(|setting| Units::from_report_inches_flag(&setting.value))
            .unwrap_or(Units::Unknown)
    }
}

impl Drop for GrblFirmwareSettings {
    fn drop(&mut self) {
        self.streamer.remove_listener(&self.reports_handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::ResponseHandler;
    use grblstream_core::ConnectionError;
    use std::sync::Weak;

    struct Offline;

    impl Connection for Offline {
        fn open(&self, _: &str, _: u32, _: Weak<dyn ResponseHandler>) -> std::result::Result<(), ConnectionError> {
            Ok(())
        }
        fn close(&self) -> std::result::Result<(), ConnectionError> {
            Ok(())
        }
        fn send_bytes(&self, _: &[u8]) -> std::result::Result<(), ConnectionError> {
            Err(ConnectionError::NotOpen)
        }
        fn send_immediate_byte(&self, _: u8) -> std::result::Result<(), ConnectionError> {
            Err(ConnectionError::NotOpen)
        }
        fn is_open(&self) -> bool {
            false
        }
    }

    fn store() -> GrblFirmwareSettings {
        GrblFirmwareSettings::new(Arc::new(Offline))
    }

    #[test]
    fn test_reporting_units() {
        let settings = store();
        assert_eq!(settings.reporting_units(), Units::Unknown);
        settings.on_updated_firmware_setting(FirmwareSetting::new("$13", "0"));
        assert_eq!(settings.reporting_units(), Units::MM);
        settings.on_updated_firmware_setting(FirmwareSetting::new("$13", "1"));
        assert_eq!(settings.reporting_units(), Units::INCH);
        settings.on_updated_firmware_setting(FirmwareSetting::new("$13", "2"));
        assert_eq!(settings.reporting_units(), Units::Unknown);
    }

    #[test]
    fn test_mask_defaults_to_zero() {
        let settings = store();
        assert!(!settings.is_invert_direction(Axis::X));
        settings.on_updated_firmware_setting(FirmwareSetting::new("$3", "junk"));
        assert!(!settings.is_invert_direction(Axis::Z));
        settings.on_updated_firmware_setting(FirmwareSetting::new("$3", "5"));
        assert!(settings.is_invert_direction(Axis::X));
        assert!(!settings.is_invert_direction(Axis::Y));
        assert!(settings.is_invert_direction(Axis::Z));
    }

    #[test]
    fn test_boolean_getters() {
        let settings = store();
        assert!(settings.is_homing_enabled().unwrap_err().is_setting_not_found());
        settings.on_updated_firmware_setting(FirmwareSetting::new("$22", "1"));
        settings.on_updated_firmware_setting(FirmwareSetting::new("$20", "true"));
        assert!(settings.is_homing_enabled().unwrap());
        assert!(!settings.is_soft_limits_enabled().unwrap());
    }

    #[test]
    fn test_numeric_getters() {
        let settings = store();
        assert!(settings
            .steps_per_millimeter(Axis::Y)
            .unwrap_err()
            .is_setting_not_found());
        settings.on_updated_firmware_setting(FirmwareSetting::new("$101", "80.000"));
        settings.on_updated_firmware_setting(FirmwareSetting::new("$132", "abc"));
        assert_eq!(settings.steps_per_millimeter(Axis::Y).unwrap(), 80.0);
        assert!(matches!(
            settings.soft_limit(Axis::Z),
            Err(grblstream_core::Error::Firmware(FirmwareError::SettingsParseError { .. }))
        ));
    }

    #[test]
    fn test_all_settings_sorted_numerically() {
        let settings = store();
        for key in ["$130", "$3", "$22", "$100"] {
            settings.on_updated_firmware_setting(FirmwareSetting::new(key, "0"));
        }
        let keys: Vec<String> = settings.get_all_settings().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["$3", "$22", "$100", "$130"]);
    }

    #[test]
    fn test_write_on_closed_connection_fails() {
        let settings = store();
        settings.on_updated_firmware_setting(FirmwareSetting::new("$21", "0"));
        let err = settings.set_value("$21", "1").unwrap_err();
        assert!(err.is_persist_failure());
        assert_eq!(settings.get_setting("$21").unwrap().value, "0");
    }
}
