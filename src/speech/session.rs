//! Speech session state machine
//!
//! The pending utterance lives inside the session and flows to the consumer
//! through the commit channel at end-time. The end handler hands off exactly
//! what the session committed; no outer layer reads the partial result on its
//! own, so a late result cannot race the end signal.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::RelayEvent;
use crate::recognizer::{Recognizer, RecognizerError, RecognizerEvent};

/// Lifecycle state of the speech session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    /// No capture in progress; initial and resting state
    Idle,
    /// The engine is capturing audio
    Listening,
    /// The engine finalized; the committed text is being handed off
    Finalizing,
}

impl Default for SpeechState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SpeechState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechState::Idle => write!(f, "Idle"),
            SpeechState::Listening => write!(f, "Listening"),
            SpeechState::Finalizing => write!(f, "Finalizing"),
        }
    }
}

/// Errors from starting or using a speech session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a recognition session is already in progress")]
    SessionBusy,

    /// Connectivity precondition, evaluated by the caller before start
    #[error("not connected to the remote executor")]
    NotReady,

    #[error(transparent)]
    Recognizer(#[from] RecognizerError),

    #[error("speech session unavailable")]
    SessionGone,
}

/// Picks the transcription to keep from a set of alternatives.
///
/// The default keeps the first alternative only; anything past it is
/// discarded. This is a deliberate simplification, swapped out by passing a
/// different policy to [`SpeechSession::new`].
pub type TranscriptPolicy = fn(&[String]) -> Option<String>;

/// Default policy: keep the first (best-ranked) alternative
pub fn first_alternative(alternatives: &[String]) -> Option<String> {
    alternatives.first().cloned()
}

/// Commands accepted by the session's run loop
#[derive(Debug)]
enum SessionCommand {
    Start {
        locale: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop,
}

/// Cloneable handle for talking to a running [`SpeechSession`]
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Start a capture for the given locale.
    ///
    /// The connectivity precondition is the caller's to check; this call only
    /// rejects a busy session or an engine start failure.
    pub async fn start(&self, locale: &str) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Start {
                locale: locale.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        reply_rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Ask the engine to finalize the current capture
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Stop).await;
    }
}

/// Owns the recognizer and the lifecycle of one capture at a time
pub struct SpeechSession<R: Recognizer> {
    recognizer: R,
    policy: TranscriptPolicy,
    state: SpeechState,
    /// Most recent partial result; valid only while Listening or Finalizing
    pending: String,
    /// Event stream of the active capture
    engine_rx: Option<mpsc::Receiver<RecognizerEvent>>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    commit_tx: mpsc::Sender<String>,
    events: broadcast::Sender<RelayEvent>,
}

impl<R: Recognizer> SpeechSession<R> {
    /// Create a session and the handle for talking to it.
    ///
    /// Committed utterances are delivered on `commit_tx`, exactly once per
    /// finished capture.
    pub fn new(
        recognizer: R,
        policy: TranscriptPolicy,
        commit_tx: mpsc::Sender<String>,
        events: broadcast::Sender<RelayEvent>,
    ) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let session = Self {
            recognizer,
            policy,
            state: SpeechState::Idle,
            pending: String::new(),
            engine_rx: None,
            cmd_rx,
            commit_tx,
            events,
        };

        (session, SessionHandle { cmd_tx })
    }

    /// Run the session, processing commands and engine events
    pub async fn run(&mut self) {
        info!("speech session started in Idle state");

        loop {
            let capturing = self.engine_rx.is_some();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                event = Self::next_engine_event(&mut self.engine_rx), if capturing => {
                    self.handle_engine_event(event).await;
                }
            }
        }

        info!("speech session stopped");
    }

    async fn next_engine_event(
        engine_rx: &mut Option<mpsc::Receiver<RecognizerEvent>>,
    ) -> Option<RecognizerEvent> {
        match engine_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start { locale, reply } => {
                let _ = reply.send(self.begin(&locale).await);
            }
            SessionCommand::Stop => {
                // No transition here; Finalizing waits for the engine's end signal
                self.recognizer.stop().await;
            }
        }
    }

    async fn begin(&mut self, locale: &str) -> Result<(), SessionError> {
        if self.state != SpeechState::Idle {
            return Err(SessionError::SessionBusy);
        }

        self.pending.clear();
        let engine_rx = self.recognizer.start(locale).await?;
        self.engine_rx = Some(engine_rx);
        self.transition(SpeechState::Listening);
        Ok(())
    }

    async fn handle_engine_event(&mut self, event: Option<RecognizerEvent>) {
        match event {
            Some(RecognizerEvent::Started) => {
                self.publish(RelayEvent::Listening);
            }
            Some(RecognizerEvent::Partial { alternatives }) => {
                if let Some(text) = (self.policy)(&alternatives) {
                    debug!(text = %text, "pending utterance updated");
                    self.pending = text;
                }
            }
            Some(RecognizerEvent::Error { detail }) => {
                warn!(detail = %detail, "recognition failed");
                self.abort();
                self.publish(RelayEvent::SpeechError { detail });
            }
            Some(RecognizerEvent::Ended) | None => {
                self.transition(SpeechState::Finalizing);
                self.commit().await;
            }
        }
    }

    /// Hand off the utterance committed at end-time, then settle back to
    /// Idle. The hand-off happens-before the Idle transition.
    async fn commit(&mut self) {
        self.engine_rx = None;
        let utterance = std::mem::take(&mut self.pending);

        if utterance.trim().is_empty() {
            self.publish(RelayEvent::NoSpeechCaptured);
        } else if self.commit_tx.send(utterance).await.is_err() {
            warn!("no consumer for committed utterance");
        }

        self.transition(SpeechState::Idle);
    }

    /// Return to Idle discarding the capture; late engine events are inert
    fn abort(&mut self) {
        self.engine_rx = None;
        self.pending.clear();
        self.transition(SpeechState::Idle);
    }

    fn transition(&mut self, next: SpeechState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "speech state transition");
            self.state = next;
        }
    }

    fn publish(&self, event: RelayEvent) {
        debug!(?event, "publishing event");
        let _ = self.events.send(event);
    }
}
