//! Listener registration and event fan-out
//!
//! Subscribers implement [`CommunicatorListener`] and register with a
//! [`ListenerDispatcher`]. Listeners may be added or removed at any time,
//! including from inside a callback: dispatch works on a snapshot of the
//! registered list.

use crate::communication::command::GcodeCommand;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Handle for a registered listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub String);

impl ListenerHandle {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Handle returned when registering a [`CommunicatorListener`]
pub type CommunicatorListenerHandle = ListenerHandle;

/// Events emitted by the command streamer
#[derive(Debug, Clone)]
pub enum CommunicatorEvent {
    /// Any line received from the controller
    RawResponse(String),
    /// A command was written to the controller
    CommandSent(GcodeCommand),
    /// The controller acknowledged a command
    CommandComplete(GcodeCommand),
    /// A command was dropped without being sent
    CommandSkipped(GcodeCommand),
    /// Informational console text
    ConsoleMessage(String),
    /// Console text describing a failure on the streaming path
    ConsoleError(String),
    /// Streaming paused because of an error
    PausedOnError,
    /// The connection was closed
    ConnectionClosed,
}

/// Listener trait for streamer events
///
/// Implement this trait to observe traffic to and from the controller.
/// Every method defaults to a no-op.
pub trait CommunicatorListener: Send + Sync {
    /// Called for every line received from the controller
    fn on_raw_response(&self, _response: &str) {}

    /// Called after a command has been written to the controller
    fn on_command_sent(&self, _command: &GcodeCommand) {}

    /// Called when the controller acknowledges a command
    fn on_command_complete(&self, _command: &GcodeCommand) {}

    /// Called when a command is dropped without being sent
    fn on_command_skipped(&self, _command: &GcodeCommand) {}

    /// Called with informational console text
    fn on_console_message(&self, _message: &str) {}

    /// Called with console text describing a streaming failure
    fn on_console_error(&self, _message: &str) {}

    /// Called when streaming pauses because of an error
    fn on_paused_on_error(&self) {}

    /// Called after the connection has been closed
    fn on_connection_closed(&self) {}
}

/// Registry of listeners of one kind
pub struct ListenerRegistry<L: ?Sized> {
    entries: RwLock<Vec<(ListenerHandle, Arc<L>)>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener and return its handle
    pub fn add_listener(&self, listener: Arc<L>) -> ListenerHandle {
        let handle = ListenerHandle::generate();
        self.entries.write().push((handle.clone(), listener));
        handle
    }

    /// Unregister a listener. Returns false if the handle was unknown.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(h, _)| h != handle);
        entries.len() != before
    }

    /// Listeners in registration order, detached from the lock
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out of [`CommunicatorEvent`]s to registered listeners
pub type ListenerDispatcher = ListenerRegistry<dyn CommunicatorListener>;

impl ListenerRegistry<dyn CommunicatorListener> {
    /// Deliver an event to every registered listener in registration order
    pub fn dispatch(&self, event: &CommunicatorEvent) {
        for listener in self.snapshot() {
            match event {
                CommunicatorEvent::RawResponse(line) => listener.on_raw_response(line),
                CommunicatorEvent::CommandSent(cmd) => listener.on_command_sent(cmd),
                CommunicatorEvent::CommandComplete(cmd) => listener.on_command_complete(cmd),
                CommunicatorEvent::CommandSkipped(cmd) => listener.on_command_skipped(cmd),
                CommunicatorEvent::ConsoleMessage(msg) => listener.on_console_message(msg),
                CommunicatorEvent::ConsoleError(msg) => listener.on_console_error(msg),
                CommunicatorEvent::PausedOnError => listener.on_paused_on_error(),
                CommunicatorEvent::ConnectionClosed => listener.on_connection_closed(),
            }
        }
    }
}
