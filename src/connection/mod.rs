//! Connection lifecycle management
//!
//! One logical connection to the remote executor: explicit connect and
//! disconnect, an ordered stream of connectivity transitions, and bounded
//! automatic reconnection with exponential backoff.

mod manager;

pub use manager::{ConnectionHandle, ConnectionManager, ConnectionState, ReconnectPolicy};
