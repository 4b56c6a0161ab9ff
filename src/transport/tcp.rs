//! TCP transport with newline-delimited text framing
//!
//! Each open link splits the stream: the write half carries outgoing
//! commands, and a reader task watches the read half so a remote close or
//! socket error surfaces as a `TransportEvent`. The link is scoped: dropping
//! it aborts the reader task and releases the socket on every exit path.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Endpoint, Transport, TransportError, TransportEvent};

/// TCP implementation of the transport capability
pub struct TcpTransport {
    link: Option<TcpLink>,
}

/// One open connection: write half plus the task watching the read half
struct TcpLink {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self { link: None }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        // Release any previous link before opening a new one
        self.link = None;

        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let (event_tx, event_rx) = mpsc::channel(8);

        let reader = tokio::spawn(watch_remote(read_half, event_tx));
        self.link = Some(TcpLink {
            writer: write_half,
            reader,
        });

        debug!(%endpoint, "tcp link established");
        Ok(event_rx)
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;

        link.writer
            .write_all(message.as_bytes())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        link.writer
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        link.writer
            .flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.writer.shutdown().await;
            debug!("tcp link closed");
        }
    }
}

/// Watch the read half of the socket for remote close or errors.
///
/// Inbound payloads are ignored; the protocol is one-way.
async fn watch_remote(mut reader: OwnedReadHalf, events: mpsc::Sender<TransportEvent>) {
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events
                    .send(TransportEvent::Closed {
                        reason: "connection closed by remote".to_string(),
                    })
                    .await;
                break;
            }
            Ok(n) => {
                debug!(bytes = n, "ignoring inbound payload");
            }
            Err(e) => {
                let _ = events
                    .send(TransportEvent::Error {
                        detail: e.to_string(),
                    })
                    .await;
                let _ = events
                    .send(TransportEvent::Closed {
                        reason: format!("read failed: {}", e),
                    })
                    .await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn local_endpoint(listener: &TcpListener) -> Endpoint {
        let addr = listener.local_addr().unwrap();
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_send_delivers_one_line_per_command() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener);

        let mut transport = TcpTransport::new();
        let _events = transport.connect(&endpoint).await.unwrap();

        let (remote, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(remote).lines();

        transport.send("go north").await.unwrap();
        transport.send("open door").await.unwrap();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "go north");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "open door");
    }

    #[tokio::test]
    async fn test_send_without_link_fails() {
        let mut transport = TcpTransport::new();
        let result = transport.send("go north").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        // Bind then drop to get a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener);
        drop(listener);

        let mut transport = TcpTransport::new();
        let result = transport.connect(&endpoint).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_remote_close_surfaces_closed_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener);

        let mut transport = TcpTransport::new();
        let mut events = transport.connect(&endpoint).await.unwrap();

        let (remote, _) = listener.accept().await.unwrap();
        drop(remote);

        match events.recv().await {
            Some(TransportEvent::Closed { reason }) => {
                assert!(reason.contains("closed by remote"));
            }
            other => panic!("expected Closed event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_releases_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener);

        let mut transport = TcpTransport::new();
        let _events = transport.connect(&endpoint).await.unwrap();
        let _ = listener.accept().await.unwrap();

        transport.disconnect().await;
        assert!(matches!(
            transport.send("go north").await,
            Err(TransportError::NotConnected)
        ));

        // Idempotent
        transport.disconnect().await;
    }
}
