//! Message transport to the remote executor
//!
//! The wire format is one opaque UTF-8 text payload per command, terminated
//! by a newline. There is no envelope and no acknowledgement; delivery
//! feedback is limited to the socket-level send result.

mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use tcp::TcpTransport;

/// Remote endpoint the transport connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Unsolicited events delivered on an open link
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The link went down without a caller-initiated disconnect
    Closed { reason: String },
    /// The link reported an error but may still be up
    Error { detail: String },
}

/// Errors from transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Connect(String),

    #[error("no open connection")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection manager unavailable")]
    ManagerGone,
}

/// Capability for moving command text to the remote executor.
///
/// `connect` resolves once the link is established and hands back the stream
/// of unsolicited link events; the caller owns that stream and drops it to
/// stop observing a link it has abandoned.
#[async_trait]
pub trait Transport: Send {
    /// Open a link to the endpoint, replacing any existing link.
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Send one text payload over the open link.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Close the link, if any. Idempotent.
    async fn disconnect(&mut self);
}
