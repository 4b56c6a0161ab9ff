//! Relay status events
//!
//! Every component publishes its externally observable effects on a shared
//! broadcast channel: connectivity transitions, reconnect scheduling, speech
//! capture lifecycle, and dispatch outcomes.

use serde::{Deserialize, Serialize};

/// Events published by the relay components during operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Opening a connection to the remote executor
    Connecting {
        /// Endpoint being connected to, as host:port
        endpoint: String,
    },

    /// Connection established
    Connected {
        /// Endpoint of the established connection, as host:port
        endpoint: String,
    },

    /// Connection is down (remote drop, failed open, or caller disconnect)
    Disconnected {
        /// Why the connection went down
        reason: String,
    },

    /// A connection attempt failed
    ConnectFailed { detail: String },

    /// The transport reported an error on an open link
    ConnectionError { detail: String },

    /// A reconnect attempt has been scheduled
    ReconnectScheduled {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Delay before the attempt fires, in milliseconds
        delay_ms: u64,
    },

    /// Reconnect budget used up; an explicit connect is required to resume
    ReconnectsExhausted { attempts: u32 },

    /// Speech capture is active
    Listening,

    /// A capture finished with nothing recognized
    NoSpeechCaptured,

    /// The recognition engine reported an error
    SpeechError { detail: String },

    /// A command was transmitted to the remote executor
    CommandSent { text: String },

    /// A command could not be transmitted
    SendFailed { detail: String },
}

impl std::fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayEvent::Connecting { endpoint } => write!(f, "CONNECTING ({})", endpoint),
            RelayEvent::Connected { endpoint } => write!(f, "CONNECTED ({})", endpoint),
            RelayEvent::Disconnected { reason } => write!(f, "DISCONNECTED ({})", reason),
            RelayEvent::ConnectFailed { detail } => write!(f, "CONNECT_FAILED ({})", detail),
            RelayEvent::ConnectionError { detail } => {
                write!(f, "CONNECTION_ERROR ({})", detail)
            }
            RelayEvent::ReconnectScheduled { attempt, delay_ms } => {
                write!(f, "RECONNECT_SCHEDULED (attempt {}, {}ms)", attempt, delay_ms)
            }
            RelayEvent::ReconnectsExhausted { attempts } => {
                write!(f, "RECONNECTS_EXHAUSTED ({} attempts)", attempts)
            }
            RelayEvent::Listening => write!(f, "LISTENING"),
            RelayEvent::NoSpeechCaptured => write!(f, "NO_SPEECH_CAPTURED"),
            RelayEvent::SpeechError { detail } => write!(f, "SPEECH_ERROR ({})", detail),
            RelayEvent::CommandSent { text } => write!(f, "COMMAND_SENT (\"{}\")", text),
            RelayEvent::SendFailed { detail } => write!(f, "SEND_FAILED ({})", detail),
        }
    }
}
