#![allow(dead_code)]

use grblstream_communication::{
    CommandStreamer, CommunicatorListener, Connection, GcodeCommand, ResponseHandler,
    StreamerConfig,
};
use grblstream_core::ConnectionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Connection that records writes and lets the test inject responses
#[derive(Default)]
pub struct MockConnection {
    sent: Mutex<Vec<String>>,
    immediate: Mutex<Vec<u8>>,
    handler: Mutex<Option<Weak<dyn ResponseHandler>>>,
    open: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything written with `send_bytes`, one entry per write
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn immediate_bytes(&self) -> Vec<u8> {
        self.immediate.lock().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Deliver a line as if the controller had sent it
    pub fn respond(&self, line: &str) {
        let handler = self.handler.lock().as_ref().and_then(Weak::upgrade);
        if let Some(handler) = handler {
            handler.handle_response(line);
        }
    }

    /// Wait until a write equal to `wire` has been recorded
    pub fn wait_for_write(&self, wire: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sent.lock().iter().any(|s| s == wire) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

impl Connection for MockConnection {
    fn open(
        &self,
        _port: &str,
        _baud_rate: u32,
        handler: Weak<dyn ResponseHandler>,
    ) -> Result<(), ConnectionError> {
        *self.handler.lock() = Some(handler);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), ConnectionError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send_bytes(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConnectionError::IoError {
                reason: "device unplugged".to_string(),
            });
        }
        self.sent
            .lock()
            .push(String::from_utf8_lossy(payload).to_string());
        Ok(())
    }

    fn send_immediate_byte(&self, byte: u8) -> Result<(), ConnectionError> {
        self.immediate.lock().push(byte);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connection that delivers controller lines from its own reader thread
///
/// Mirrors the serial transport: lines queued with `push_line` reach the
/// response handler on the reader thread, and `close` joins that thread
/// after it has drained what was queued. With `auto_ok` every write is
/// answered with `ok`.
#[derive(Default)]
pub struct ThreadedConnection {
    sent: Mutex<Vec<String>>,
    inbox: Mutex<Option<Sender<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    auto_ok: AtomicBool,
}

impl ThreadedConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn set_auto_ok(&self, enabled: bool) {
        self.auto_ok.store(enabled, Ordering::SeqCst);
    }

    /// Queue a line for the reader thread; dropped when closed
    pub fn push_line(&self, line: &str) {
        if let Some(inbox) = self.inbox.lock().as_ref() {
            let _ = inbox.send(line.to_string());
        }
    }
}

impl Connection for ThreadedConnection {
    fn open(
        &self,
        _port: &str,
        _baud_rate: u32,
        handler: Weak<dyn ResponseHandler>,
    ) -> Result<(), ConnectionError> {
        self.close()?;

        let (tx, rx) = mpsc::channel::<String>();
        let reader = thread::Builder::new()
            .name("mock-reader".to_string())
            .spawn(move || {
                for line in rx {
                    match handler.upgrade() {
                        Some(handler) => handler.handle_response(&line),
                        None => return,
                    }
                }
            })?;

        *self.reader.lock() = Some(reader);
        *self.inbox.lock() = Some(tx);
        Ok(())
    }

    fn close(&self) -> Result<(), ConnectionError> {
        drop(self.inbox.lock().take());
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
        Ok(())
    }

    fn send_bytes(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        self.sent
            .lock()
            .push(String::from_utf8_lossy(payload).to_string());
        if self.auto_ok.load(Ordering::SeqCst) {
            self.push_line("ok");
        }
        Ok(())
    }

    fn send_immediate_byte(&self, _byte: u8) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inbox.lock().is_some()
    }
}

/// Listener recording every event as a short string
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<String>>,
    completed: Mutex<Vec<GcodeCommand>>,
    skipped: Mutex<Vec<GcodeCommand>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn completed(&self) -> Vec<GcodeCommand> {
        self.completed.lock().clone()
    }

    pub fn skipped(&self) -> Vec<GcodeCommand> {
        self.skipped.lock().clone()
    }

    pub fn console_errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("console_error:").map(str::to_string))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl CommunicatorListener for EventRecorder {
    fn on_raw_response(&self, response: &str) {
        self.events.lock().push(format!("raw:{}", response));
    }

    fn on_command_sent(&self, command: &GcodeCommand) {
        self.events.lock().push(format!("sent:{}", command.trimmed()));
    }

    fn on_command_complete(&self, command: &GcodeCommand) {
        self.events
            .lock()
            .push(format!("complete:{}", command.trimmed()));
        self.completed.lock().push(command.clone());
    }

    fn on_command_skipped(&self, command: &GcodeCommand) {
        self.events
            .lock()
            .push(format!("skipped:{}", command.trimmed()));
        self.skipped.lock().push(command.clone());
    }

    fn on_console_message(&self, message: &str) {
        self.events.lock().push(format!("console:{}", message));
    }

    fn on_console_error(&self, message: &str) {
        self.events
            .lock()
            .push(format!("console_error:{}", message));
    }

    fn on_paused_on_error(&self) {
        self.events.lock().push("paused_on_error".to_string());
    }

    fn on_connection_closed(&self) {
        self.events.lock().push("connection_closed".to_string());
    }
}

/// Open streamer over a fresh mock connection
pub fn open_streamer(config: StreamerConfig) -> (CommandStreamer, Arc<MockConnection>) {
    let connection = MockConnection::new();
    let streamer = CommandStreamer::with_config(connection.clone(), config);
    streamer
        .open_port("mock", 115_200)
        .expect("mock port opens");
    (streamer, connection)
}
