//! Serial port connection
//!
//! [`SerialConnection`] implements [`Connection`] on top of the
//! `serialport` crate. A reader thread splits incoming bytes into lines
//! and hands each non-empty line to the response handler; writes go
//! through a shared port handle.

use crate::communication::{Connection, ResponseHandler};
use grblstream_core::{ConnectionError, Error, Result};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Port read/write timeout
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    fn from_usb(port_name: &str, usb: &serialport::UsbPortInfo) -> Self {
        Self {
            port_name: port_name.to_string(),
            description: format!(
                "USB {} {}",
                usb.manufacturer.as_deref().unwrap_or("Device"),
                usb.product.as_deref().unwrap_or("Serial Port")
            ),
            manufacturer: usb.manufacturer.clone(),
            serial_number: usb.serial_number.clone(),
            vid: Some(usb.vid),
            pid: Some(usb.pid),
        }
    }
}

/// List serial ports that look like CNC controllers
///
/// Matches `COM*` on Windows, `/dev/ttyUSB*` and `/dev/ttyACM*` on Linux,
/// and `/dev/cu.usbserial-*` and `/dev/cu.usbmodem*` on macOS.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => SerialPortInfo::from_usb(&port.port_name, usb),
            serialport::SerialPortType::BluetoothPort => {
                SerialPortInfo::new(&port.port_name, "Bluetooth Serial")
            }
            serialport::SerialPortType::PciPort => SerialPortInfo::new(&port.port_name, "PCI Serial"),
            _ => SerialPortInfo::new(&port.port_name, "Serial Port"),
        })
        .collect())
}

/// Check if a port name matches CNC controller patterns
pub fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Splits a byte stream into lines
///
/// Lines end at `\n`; a trailing `\r` is dropped and blank lines are
/// discarded.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and collect every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.partial);
                let line = line.trim_end_matches('\r');
                if !line.trim().is_empty() {
                    lines.push(line.to_string());
                }
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }
}

struct ReaderThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReaderThread {
    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!("Serial reader thread panicked");
        }
    }
}

/// Serial port connection to a controller
#[derive(Default)]
pub struct SerialConnection {
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    reader: Mutex<Option<ReaderThread>>,
}

impl SerialConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_reader(
        mut port: Box<dyn serialport::SerialPort>,
        handler: Weak<dyn ResponseHandler>,
    ) -> std::result::Result<ReaderThread, ConnectionError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("grbl-serial-reader".to_string())
            .spawn(move || {
                let mut assembler = LineAssembler::new();
                let mut buf = [0u8; 256];
                while flag.load(Ordering::SeqCst) {
                    match port.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            for line in assembler.push(&buf[..n]) {
                                let Some(handler) = handler.upgrade() else {
                                    debug!("Response handler dropped, stopping reader");
                                    return;
                                };
                                trace!("<<< {}", line);
                                handler.handle_response(&line);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            error!("Serial read failed: {}", e);
                            return;
                        }
                    }
                }
            })?;

        Ok(ReaderThread { running, handle })
    }
}

impl Connection for SerialConnection {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        handler: Weak<dyn ResponseHandler>,
    ) -> std::result::Result<(), ConnectionError> {
        if baud_rate == 0 {
            return Err(ConnectionError::UnsupportedBaudRate { baud: baud_rate });
        }
        self.close()?;

        let opened = serialport::new(port, baud_rate)
            .timeout(PORT_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                    port: port.to_string(),
                },
                _ => ConnectionError::FailedToOpen {
                    port: port.to_string(),
                    reason: e.to_string(),
                },
            })?;

        let reader_port = opened.try_clone().map_err(|e| ConnectionError::FailedToOpen {
            port: port.to_string(),
            reason: e.to_string(),
        })?;

        *self.reader.lock() = Some(Self::spawn_reader(reader_port, handler)?);
        *self.port.lock() = Some(opened);
        debug!("Serial port {} open at {} baud", port, baud_rate);
        Ok(())
    }

    fn close(&self) -> std::result::Result<(), ConnectionError> {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.stop();
        }
        if self.port.lock().take().is_some() {
            debug!("Serial port closed");
        }
        Ok(())
    }

    fn send_bytes(&self, payload: &[u8]) -> std::result::Result<(), ConnectionError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(ConnectionError::NotOpen)?;
        port.write_all(payload)?;
        port.flush()?;
        Ok(())
    }

    fn send_immediate_byte(&self, byte: u8) -> std::result::Result<(), ConnectionError> {
        self.send_bytes(&[byte])
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cnc_ports() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14101"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_line_assembler_splits_and_strips() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"o").is_empty());
        assert_eq!(assembler.push(b"k\r\n<Idle>\r\n"), vec!["ok", "<Idle>"]);
        assert!(assembler.push(b"\r\n\n").is_empty());
        assert_eq!(assembler.push(b"error:2\n"), vec!["error:2"]);
    }

    #[test]
    fn test_send_when_closed() {
        let connection = SerialConnection::new();
        assert!(!connection.is_open());
        assert_eq!(connection.send_bytes(b"G0\n"), Err(ConnectionError::NotOpen));
        assert!(connection.close().is_ok());
    }
}
