//! Communication layer
//!
//! The [`Connection`] trait is the boundary to the physical transport.
//! [`CommandStreamer`] drives the GRBL character-counting protocol on top
//! of it and fans events out through a [`ListenerDispatcher`].

pub mod command;
pub mod listener;
pub mod serial;
pub mod streamer;

use grblstream_core::ConnectionError;
use std::sync::Weak;

pub use command::{CommandId, CommandState, GcodeCommand};
pub use listener::{
    CommunicatorEvent, CommunicatorListener, CommunicatorListenerHandle, ListenerDispatcher,
    ListenerHandle, ListenerRegistry,
};
pub use serial::{list_ports, SerialConnection, SerialPortInfo};
pub use streamer::{CommandStreamer, StreamState, StreamerConfig, MAX_BUFFER};

/// GRBL soft reset control character (Ctrl-X)
pub const SOFT_RESET_BYTE: u8 = 0x18;

/// Receiver of lines read from a connection
pub trait ResponseHandler: Send + Sync {
    /// Handle one received line with its terminator stripped
    fn handle_response(&self, line: &str);
}

/// Byte-oriented link to the controller
///
/// Implementations deliver every received line to the handler passed to
/// [`Connection::open`] until the connection is closed. The handler is
/// held weakly so the connection never keeps its consumer alive.
pub trait Connection: Send + Sync {
    /// Open the named port at the given baud rate
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        handler: Weak<dyn ResponseHandler>,
    ) -> Result<(), ConnectionError>;

    /// Close the port. Closing an already closed connection succeeds.
    fn close(&self) -> Result<(), ConnectionError>;

    /// Write a payload to the controller
    fn send_bytes(&self, payload: &[u8]) -> Result<(), ConnectionError>;

    /// Write a single real-time byte, bypassing any buffering
    fn send_immediate_byte(&self, byte: u8) -> Result<(), ConnectionError>;

    /// Whether the port is currently open
    fn is_open(&self) -> bool;
}
