//! Streamed command types and lifecycle

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a streamed command
pub type CommandId = String;

/// Command execution state
///
/// Represents the lifecycle state of a command from enqueue through acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    /// Command queued but not yet sent
    Pending,
    /// Command sent to controller, awaiting acknowledgement
    Sent,
    /// Controller acknowledged command with "ok"
    Ok,
    /// Controller acknowledged command with an error
    Error,
    /// Command was dropped without reaching the controller
    Skipped,
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Sent => write!(f, "Sent"),
            Self::Ok => write!(f, "Ok"),
            Self::Error => write!(f, "Error"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// A command travelling through the streamer
///
/// Keeps the text as it was enqueued alongside the newline-terminated
/// form written to the wire. The wire form's byte length is what counts
/// against the controller's receive buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcodeCommand {
    /// Unique identifier for this command
    pub id: CommandId,
    /// Text as passed to `enqueue`
    pub command: String,
    /// Newline-terminated form written to the controller
    pub wire: String,
    /// Position in enqueue order (0-based)
    pub sequence_number: u64,
    /// Command execution state
    pub state: CommandState,
    /// Acknowledgement line received from the controller
    pub response: Option<String>,
}

impl GcodeCommand {
    /// Create a new command, appending a newline if absent
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let mut wire = command.clone();
        if !wire.ends_with('\n') {
            wire.push('\n');
        }

        Self {
            id: CommandId::from(Uuid::new_v4().to_string()),
            command,
            wire,
            sequence_number: 0,
            state: CommandState::Pending,
            response: None,
        }
    }

    /// Create a new command with a sequence number
    pub fn with_sequence(command: impl Into<String>, sequence: u64) -> Self {
        let mut cmd = Self::new(command);
        cmd.sequence_number = sequence;
        cmd
    }

    /// Bytes this command occupies in the controller's receive buffer
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Command text without its line terminator
    pub fn trimmed(&self) -> &str {
        self.wire.trim_end_matches(['\r', '\n'])
    }

    /// Whether the command has been written to the controller
    pub fn is_sent(&self) -> bool {
        !matches!(self.state, CommandState::Pending | CommandState::Skipped)
    }

    /// Whether the controller acknowledged this command
    pub fn is_completed(&self) -> bool {
        matches!(self.state, CommandState::Ok | CommandState::Error)
    }

    /// Whether the acknowledgement was an error
    pub fn is_error(&self) -> bool {
        self.state == CommandState::Error
    }

    /// Mark this command as sent
    pub fn mark_sent(&mut self) -> &mut Self {
        debug_assert!(
            self.state == CommandState::Pending,
            "mark_sent called on command in {:?} state (expected Pending)",
            self.state
        );
        self.state = CommandState::Sent;
        self
    }

    /// Attach the acknowledgement and complete the command
    pub fn mark_completed(&mut self, response: impl Into<String>, success: bool) -> &mut Self {
        debug_assert!(
            self.state == CommandState::Sent,
            "mark_completed called on command in {:?} state (expected Sent)",
            self.state
        );
        self.response = Some(response.into());
        self.state = if success {
            CommandState::Ok
        } else {
            CommandState::Error
        };
        self
    }

    /// Mark this command as skipped
    pub fn mark_skipped(&mut self) -> &mut Self {
        debug_assert!(
            self.state == CommandState::Pending,
            "mark_skipped called on command in {:?} state (expected Pending)",
            self.state
        );
        self.state = CommandState::Skipped;
        self
    }
}

impl std::fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.trimmed())
    }
}
