//! Command streaming with flow control and acknowledgement tracking
//!
//! Implements GRBL's character-counting streaming protocol: commands are
//! written only while the bytes outstanding in the controller's receive
//! buffer leave room for them, and every `ok`/`error` line releases the
//! oldest outstanding command.
//!
//! # Features
//! - Pending queue and in-flight list in strict FIFO order
//! - Receive-buffer accounting
//! - Single-step mode (at most one outstanding command)
//! - Pause/resume, cancel and hard reset
//! - Event fan-out to registered listeners
//!
//! Both the push path (the drain loop) and the pop path (response intake)
//! run inside one reentrant critical section. Listeners are notified from
//! inside that section, so they observe events in mutation order and may
//! call back into the streamer from the callback thread.

use crate::communication::command::{CommandState, GcodeCommand};
use crate::communication::listener::{
    CommunicatorEvent, CommunicatorListener, CommunicatorListenerHandle, ListenerDispatcher,
};
use crate::communication::{Connection, ResponseHandler, SOFT_RESET_BYTE};
use crate::firmware::grbl::response_parser::{is_ok_error_response, GrblResponse};
use grblstream_core::{Result, StreamError};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Size of GRBL's serial receive buffer in bytes
pub const MAX_BUFFER: usize = 127;

/// Configuration for the command streamer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Capacity of the controller's receive buffer in bytes
    pub max_buffer: usize,
    /// Pause streaming when the controller rejects a command
    pub pause_on_error: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            max_buffer: MAX_BUFFER,
            pause_on_error: false,
        }
    }
}

impl StreamerConfig {
    /// Config with a specific buffer capacity
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            max_buffer,
            ..Self::default()
        }
    }
}

/// Observable streaming state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Nothing queued and nothing awaiting acknowledgement
    Idle,
    /// Commands are queued or in flight
    Streaming,
    /// Transmission is suspended; queueing continues
    Paused,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Queues and accounting owned by the streamer
#[derive(Debug, Default)]
struct StreamBuffers {
    /// Commands waiting to be sent
    pending: VecDeque<GcodeCommand>,
    /// Sent commands awaiting acknowledgement, oldest first
    active: VecDeque<GcodeCommand>,
    /// Sum of the wire lengths in `active`
    sent_buffer_size: usize,
    send_paused: bool,
    single_step: bool,
    next_sequence: u64,
}

impl StreamBuffers {
    fn clear(&mut self) {
        self.pending.clear();
        self.active.clear();
        self.sent_buffer_size = 0;
    }
}

/// What the drain loop decided for the head of the pending queue
enum DrainStep {
    Stop,
    Transmit(GcodeCommand),
    Skip(GcodeCommand),
}

struct StreamerInner {
    connection: Arc<dyn Connection>,
    config: StreamerConfig,
    state: ReentrantMutex<RefCell<StreamBuffers>>,
    listeners: ListenerDispatcher,
}

/// GRBL command streamer
///
/// Cheap to clone; clones share the same queues and listeners.
#[derive(Clone)]
pub struct CommandStreamer {
    inner: Arc<StreamerInner>,
}

impl CommandStreamer {
    /// Create a streamer with the default configuration
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::with_config(connection, StreamerConfig::default())
    }

    /// Create a streamer with a specific configuration
    pub fn with_config(connection: Arc<dyn Connection>, config: StreamerConfig) -> Self {
        Self {
            inner: Arc::new(StreamerInner {
                connection,
                config,
                state: ReentrantMutex::new(RefCell::new(StreamBuffers::default())),
                listeners: ListenerDispatcher::new(),
            }),
        }
    }

    /// Streamer configuration
    pub fn config(&self) -> &StreamerConfig {
        &self.inner.config
    }

    /// Underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.inner.connection
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn CommunicatorListener>) -> CommunicatorListenerHandle {
        self.inner.listeners.add_listener(listener)
    }

    /// Unregister a listener
    pub fn remove_listener(&self, handle: &CommunicatorListenerHandle) -> bool {
        self.inner.listeners.remove_listener(handle)
    }

    /// Open the port, bind this streamer as its response handler and
    /// start from empty queues.
    ///
    /// The connection is opened outside the state lock, because reopening
    /// may join a reader thread that is waiting on it.
    pub fn open_port(&self, port: &str, baud_rate: u32) -> Result<()> {
        let inner: Weak<StreamerInner> = Arc::downgrade(&self.inner);
        let handler: Weak<dyn ResponseHandler> = inner;
        self.inner.connection.open(port, baud_rate, handler)?;

        let guard = self.inner.state.lock();
        let mut buffers = guard.borrow_mut();
        buffers.clear();
        buffers.send_paused = false;
        debug!("Opened {} at {} baud", port, baud_rate);
        Ok(())
    }

    /// Close the port and drop all queued and in-flight commands
    ///
    /// The transport is closed before the state lock is taken, so a
    /// reader thread blocked on the lock can finish its line and exit.
    pub fn close_port(&self) -> Result<()> {
        let result = self.inner.connection.close();

        let guard = self.inner.state.lock();
        {
            let mut buffers = guard.borrow_mut();
            buffers.clear();
            buffers.send_paused = false;
        }
        self.inner.emit(CommunicatorEvent::ConnectionClosed);
        debug!("Connection closed");
        result.map_err(Into::into)
    }

    /// Whether the underlying connection is open
    pub fn is_open(&self) -> bool {
        self.inner.connection.is_open()
    }

    /// Queue a command for transmission
    ///
    /// A newline is appended if absent. Never transmits directly when
    /// paused; otherwise the drain loop runs before returning.
    pub fn enqueue(&self, command: impl Into<String>) {
        let guard = self.inner.state.lock();
        let paused = {
            let mut buffers = guard.borrow_mut();
            let sequence = buffers.next_sequence;
            buffers.next_sequence += 1;
            let command = GcodeCommand::with_sequence(command, sequence);
            trace!("Queued #{}: {}", sequence, command);
            buffers.pending.push_back(command);
            buffers.send_paused
        };

        if !paused {
            self.inner.stream_commands(&guard);
        }
    }

    /// Run the drain loop
    pub fn stream_commands(&self) {
        let guard = self.inner.state.lock();
        self.inner.stream_commands(&guard);
    }

    /// Deliver a line received from the controller
    pub fn handle_response(&self, line: &str) {
        self.inner.process_response(line);
    }

    /// Suspend transmission
    pub fn pause(&self) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().send_paused = true;
        debug!("Streaming paused");
    }

    /// Resume transmission and drain immediately
    pub fn resume(&self) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().send_paused = false;
        debug!("Streaming resumed");
        self.inner.stream_commands(&guard);
    }

    /// Drop every command not yet sent
    ///
    /// Commands already in flight remain and still need acknowledging.
    pub fn cancel(&self) {
        let guard = self.inner.state.lock();
        let dropped = {
            let mut buffers = guard.borrow_mut();
            let dropped = buffers.pending.len();
            buffers.pending.clear();
            dropped
        };
        debug!("Cancelled {} queued commands", dropped);
    }

    /// Forget every queued and in-flight command
    ///
    /// Used when the controller's own buffer is known to be wiped.
    pub fn reset(&self) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().clear();
        debug!("Streamer reset");
    }

    /// Send GRBL's soft reset byte and forget all outstanding commands
    pub fn soft_reset(&self) -> Result<()> {
        let guard = self.inner.state.lock();
        self.inner.connection.send_immediate_byte(SOFT_RESET_BYTE)?;
        guard.borrow_mut().clear();
        debug!("Soft reset sent");
        Ok(())
    }

    /// Write a real-time byte, bypassing the queue
    pub fn send_byte_immediately(&self, byte: u8) -> Result<()> {
        let _guard = self.inner.state.lock();
        trace!("Immediate byte 0x{:02X}", byte);
        self.inner.connection.send_immediate_byte(byte)?;
        Ok(())
    }

    /// Enable or disable single-step mode
    pub fn set_single_step_mode(&self, enabled: bool) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().single_step = enabled;
        debug!("Single step mode = {}", enabled);
    }

    /// Whether single-step mode is enabled
    pub fn single_step_mode(&self) -> bool {
        self.with_buffers(|b| b.single_step)
    }

    /// Whether transmission is paused
    pub fn is_paused(&self) -> bool {
        self.with_buffers(|b| b.send_paused)
    }

    /// Current streaming state
    pub fn stream_state(&self) -> StreamState {
        self.with_buffers(|b| {
            if b.send_paused {
                StreamState::Paused
            } else if b.pending.is_empty() && b.active.is_empty() {
                StreamState::Idle
            } else {
                StreamState::Streaming
            }
        })
    }

    /// Number of commands waiting to be sent
    pub fn pending_count(&self) -> usize {
        self.with_buffers(|b| b.pending.len())
    }

    /// Number of commands awaiting acknowledgement
    pub fn active_count(&self) -> usize {
        self.with_buffers(|b| b.active.len())
    }

    /// Whether any command awaits acknowledgement
    pub fn are_active_commands(&self) -> bool {
        self.active_count() > 0
    }

    /// Bytes currently outstanding in the controller's buffer
    pub fn buffer_used(&self) -> usize {
        self.with_buffers(|b| b.sent_buffer_size)
    }

    /// Get the current buffer usage as a percentage
    pub fn buffer_usage_percent(&self) -> u32 {
        let capacity = self.inner.config.max_buffer;
        if capacity == 0 {
            return 0;
        }

        ((self.buffer_used() as f64 / capacity as f64) * 100.0) as u32
    }

    /// Snapshot of the in-flight list, oldest first
    pub fn active_commands(&self) -> Vec<GcodeCommand> {
        self.with_buffers(|b| b.active.iter().cloned().collect())
    }

    /// Snapshot of the pending queue, next to send first
    pub fn pending_commands(&self) -> Vec<GcodeCommand> {
        self.with_buffers(|b| b.pending.iter().cloned().collect())
    }

    fn with_buffers<R>(&self, f: impl FnOnce(&StreamBuffers) -> R) -> R {
        let guard = self.inner.state.lock();
        let buffers = guard.borrow();
        f(&buffers)
    }
}

impl StreamerInner {
    fn emit(&self, event: CommunicatorEvent) {
        self.listeners.dispatch(&event);
    }

    /// Decide what to do with the head of the pending queue
    fn next_step(&self, cell: &RefCell<StreamBuffers>) -> DrainStep {
        let mut buffers = cell.borrow_mut();
        if buffers.send_paused {
            return DrainStep::Stop;
        }

        let length = match buffers.pending.front() {
            Some(head) => head.wire_len(),
            None => return DrainStep::Stop,
        };

        if length > self.config.max_buffer {
            return match buffers.pending.pop_front() {
                Some(mut command) => {
                    command.mark_skipped();
                    DrainStep::Skip(command)
                }
                None => DrainStep::Stop,
            };
        }

        if buffers.sent_buffer_size + length > self.config.max_buffer {
            return DrainStep::Stop;
        }

        if buffers.single_step && !buffers.active.is_empty() {
            return DrainStep::Stop;
        }

        match buffers.pending.pop_front() {
            Some(mut command) => {
                command.mark_sent();
                buffers.sent_buffer_size += length;
                buffers.active.push_back(command.clone());
                DrainStep::Transmit(command)
            }
            None => DrainStep::Stop,
        }
    }

    fn stream_commands(&self, cell: &RefCell<StreamBuffers>) {
        loop {
            match self.next_step(cell) {
                DrainStep::Stop => break,
                DrainStep::Skip(command) => {
                    let err = StreamError::CommandTooLong {
                        length: command.wire_len(),
                        capacity: self.config.max_buffer,
                    };
                    warn!("Skipping '{}': {}", command, err);
                    self.emit(CommunicatorEvent::ConsoleError(format!(
                        "Skipping '{}': {}",
                        command, err
                    )));
                    self.emit(CommunicatorEvent::CommandSkipped(command));
                }
                DrainStep::Transmit(command) => {
                    trace!(">>> {}", command);
                    match self.connection.send_bytes(command.wire.as_bytes()) {
                        Ok(()) => {
                            self.emit(CommunicatorEvent::ConsoleMessage(format!(
                                ">>> {}",
                                command.wire
                            )));
                            self.emit(CommunicatorEvent::CommandSent(command));
                        }
                        Err(e) => {
                            self.transmit_failed(cell, command, e.to_string());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Roll a command back out of the in-flight list after a failed write
    fn transmit_failed(&self, cell: &RefCell<StreamBuffers>, mut command: GcodeCommand, reason: String) {
        {
            let mut buffers = cell.borrow_mut();
            if let Some(index) = buffers.active.iter().rposition(|c| c.id == command.id) {
                buffers.active.remove(index);
                buffers.sent_buffer_size = buffers.sent_buffer_size.saturating_sub(command.wire_len());
            }
            buffers.send_paused = true;
        }
        command.state = CommandState::Skipped;

        let err = StreamError::TransportFailure { reason };
        error!("Failed to send '{}': {}", command, err);
        self.emit(CommunicatorEvent::ConsoleError(format!(
            "Failed to send '{}': {}",
            command, err
        )));
        self.emit(CommunicatorEvent::CommandSkipped(command));
        self.emit(CommunicatorEvent::PausedOnError);
    }

    fn process_response(&self, line: &str) {
        let guard = self.state.lock();
        trace!("<<< {}", line);
        self.emit(CommunicatorEvent::RawResponse(line.to_string()));

        if !is_ok_error_response(line) {
            return;
        }

        let response = line.trim();
        let success = GrblResponse::parse(response) == GrblResponse::Ok;
        let completed = {
            let mut buffers = guard.borrow_mut();
            match buffers.active.pop_front() {
                Some(mut command) => {
                    debug_assert!(buffers.sent_buffer_size >= command.wire_len());
                    buffers.sent_buffer_size =
                        buffers.sent_buffer_size.saturating_sub(command.wire_len());
                    command.mark_completed(response, success);
                    Some(command)
                }
                None => None,
            }
        };

        let Some(command) = completed else {
            let err = StreamError::ProtocolViolation {
                response: response.to_string(),
            };
            warn!("{}", err);
            self.emit(CommunicatorEvent::ConsoleError(err.to_string()));
            return;
        };

        if !success {
            let description = GrblResponse::parse(response).to_string();
            self.emit(CommunicatorEvent::ConsoleError(format!(
                "Error while processing '{}': {}",
                command, description
            )));
        }
        self.emit(CommunicatorEvent::CommandComplete(command));

        let paused = {
            let mut buffers = guard.borrow_mut();
            if !success && self.config.pause_on_error && !buffers.send_paused {
                buffers.send_paused = true;
                Some(true)
            } else if buffers.send_paused {
                None
            } else {
                Some(false)
            }
        };

        match paused {
            Some(true) => {
                debug!("Paused after error response");
                self.emit(CommunicatorEvent::PausedOnError);
            }
            Some(false) => self.stream_commands(&guard),
            None => {}
        }
    }
}

impl ResponseHandler for StreamerInner {
    fn handle_response(&self, line: &str) {
        self.process_response(line);
    }
}
