//! Error handling for grblstream
//!
//! Provides error types for each layer of the streaming engine:
//! - Connection errors (transport open/write/close)
//! - Stream errors (failures on the streaming path with no synchronous caller)
//! - Firmware errors (settings lookups, parsing and persistence)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors raised by a transport while opening, writing to,
/// or closing the link to the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Operation attempted on a closed connection
    #[error("Connection is not open")]
    NotOpen,

    /// Baud rate not supported
    #[error("Baud rate {baud} not supported")]
    UnsupportedBaudRate {
        /// The unsupported baud rate.
        baud: u32,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::IoError {
            reason: err.to_string(),
        }
    }
}

/// Streaming-path error type
///
/// These errors never return to a caller. The streamer renders them into
/// console-error events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Writing a command to the transport failed
    #[error("Transport failure: {reason}")]
    TransportFailure {
        /// The reason reported by the transport.
        reason: String,
    },

    /// An acknowledgement arrived with no command in flight
    #[error("Protocol violation: received '{response}' with no command in flight")]
    ProtocolViolation {
        /// The acknowledgement line that had no matching command.
        response: String,
    },

    /// A command can never fit in the controller's receive buffer
    #[error("Command of {length} bytes exceeds the {capacity} byte controller buffer")]
    CommandTooLong {
        /// Wire length of the command.
        length: usize,
        /// Configured controller buffer capacity.
        capacity: usize,
    },
}

/// Firmware error type
///
/// Represents failures of the firmware settings store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// No setting with this key has been reported by the controller
    #[error("Couldn't find setting with key {key}")]
    SettingNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The controller did not confirm a setting write
    #[error("Couldn't persist setting {key}: {reason}")]
    SettingsPersistFailure {
        /// The key being written.
        key: String,
        /// Why the write was not confirmed.
        reason: String,
    },

    /// A numeric read was requested but the cached value is not a number
    #[error("Expected the key {key} to contain a numeric value but was {value}")]
    SettingsParseError {
        /// The key that was read.
        key: String,
        /// The cached value.
        value: String,
    },
}

/// Main error type for grblstream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Streaming error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }

    /// Check if this is a missing-setting error
    pub fn is_setting_not_found(&self) -> bool {
        matches!(self, Error::Firmware(FirmwareError::SettingNotFound { .. }))
    }

    /// Check if this is a failed settings write
    pub fn is_persist_failure(&self) -> bool {
        matches!(
            self,
            Error::Firmware(FirmwareError::SettingsPersistFailure { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
