//! Speech capture lifecycle
//!
//! One recognition attempt at a time: Idle while resting, Listening while
//! the engine captures, Finalizing between the engine's end signal and the
//! single hand-off of the committed utterance.

mod session;

pub use session::{
    first_alternative, SessionError, SessionHandle, SpeechSession, SpeechState, TranscriptPolicy,
};
