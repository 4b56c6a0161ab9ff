//! Speech recognition capability
//!
//! The on-device engine is external to this crate; components consume it
//! through the `Recognizer` trait and its event stream. `ChannelRecognizer`
//! is the shipped implementation, fed by an external driver (the console
//! front end, or a test).

mod channel;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use channel::{ChannelRecognizer, RecognizerDriver};

/// Events emitted by the recognition engine during one capture
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// Audio capture has begun
    Started,
    /// A partial recognition result; alternatives are ordered best-first
    Partial { alternatives: Vec<String> },
    /// The engine failed; the capture is over
    Error { detail: String },
    /// The engine finalized the capture
    Ended,
}

/// Errors from the recognition capability
#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("recognition engine failed to start: {0}")]
    Start(String),
}

/// Capability for capturing one utterance at a time.
#[async_trait]
pub trait Recognizer: Send {
    /// Begin capturing audio for the given locale.
    ///
    /// Resolves to the event stream for this capture; events for an earlier
    /// capture never appear on it.
    async fn start(&mut self, locale: &str)
        -> Result<mpsc::Receiver<RecognizerEvent>, RecognizerError>;

    /// Ask the engine to finalize the current capture.
    ///
    /// The capture is over only when the event stream delivers `Ended`.
    async fn stop(&mut self);
}
