//! Command dispatcher implementation
//!
//! A `Command` only ever exists in validated form: trimmed, non-empty,
//! stamped at construction. Validation happens before any side effect, the
//! connectivity check reads the state current at the instant of the call,
//! and a failed send is never retried here; the user may resubmit.

use std::time::SystemTime;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::events::RelayEvent;

/// A validated command bound for the remote executor
#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    created_at: SystemTime,
}

impl Command {
    /// Build a command from raw input, trimming it; fails on empty input
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::EmptyCommand);
        }
        Ok(Self {
            text: trimmed.to_string(),
            created_at: SystemTime::now(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

/// Errors from a dispatch call
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command is empty after trimming")]
    EmptyCommand,

    #[error("not connected to the remote executor")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Performs the validated, at-most-once send
pub struct CommandDispatcher {
    conn: ConnectionHandle,
    events: broadcast::Sender<RelayEvent>,
}

impl CommandDispatcher {
    pub fn new(conn: ConnectionHandle, events: broadcast::Sender<RelayEvent>) -> Self {
        Self { conn, events }
    }

    /// Validate `raw` and transmit it as a single opaque message.
    ///
    /// Rejections (empty command, not connected) happen before any side
    /// effect. A connectivity change arriving after the check does not roll
    /// back the decision; it affects the next call.
    pub async fn dispatch(&self, raw: &str) -> Result<Command, DispatchError> {
        let command = Command::parse(raw)?;

        if self.conn.state() != ConnectionState::Connected {
            return Err(DispatchError::NotConnected);
        }

        match self.conn.send(command.text().to_string()).await {
            Ok(()) => {
                debug!(
                    text = command.text(),
                    created_at = ?command.created_at(),
                    "command dispatched"
                );
                let _ = self.events.send(RelayEvent::CommandSent {
                    text: command.text().to_string(),
                });
                Ok(command)
            }
            Err(e) => {
                warn!(error = %e, "command send failed");
                let _ = self.events.send(RelayEvent::SendFailed {
                    detail: e.to_string(),
                });
                Err(DispatchError::SendFailed(e.to_string()))
            }
        }
    }
}
