//! # grblstream Communication
//!
//! GRBL command streaming over a pluggable connection, plus a firmware
//! settings store that reads and writes `$n` settings through it.

pub mod communication;
pub mod firmware;

pub use communication::{
    serial::{list_ports, SerialConnection, SerialPortInfo},
    CommandId, CommandState, CommandStreamer, CommunicatorEvent, CommunicatorListener,
    CommunicatorListenerHandle, Connection, GcodeCommand, ListenerDispatcher, ListenerHandle,
    ResponseHandler, StreamState, StreamerConfig, MAX_BUFFER, SOFT_RESET_BYTE,
};

pub use firmware::{
    FirmwareSetting, FirmwareSettingsListener, GrblFirmwareSettings, GrblResponse,
    DEFAULT_WRITE_TIMEOUT,
};
