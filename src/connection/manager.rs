//! Connection manager implementation
//!
//! Owns the transport link and the connectivity state. State is mutated
//! only here; other components read it through the handle's watch channel
//! and observe transitions on the broadcast stream in the exact order they
//! occur.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::events::RelayEvent;
use crate::transport::{Endpoint, Transport, TransportError, TransportEvent};

/// Connectivity state of the single logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; also the terminal state after reconnect exhaustion
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// The link is up and commands can be sent
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Bounded reconnection policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts after which the manager stops trying until an explicit connect
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles on each further attempt
    pub base_delay: Duration,
    /// Upper bound on the per-attempt delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given attempt number (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Commands accepted by the manager's run loop
#[derive(Debug)]
pub(crate) enum ManagerCommand {
    Connect {
        endpoint: Endpoint,
    },
    Disconnect,
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

/// Cloneable handle for talking to a running [`ConnectionManager`]
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Current connectivity state, read at the instant of the call
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Ask the manager to connect; outcome arrives on the event stream
    pub async fn connect(&self, endpoint: Endpoint) {
        let _ = self.cmd_tx.send(ManagerCommand::Connect { endpoint }).await;
    }

    /// Ask the manager to tear down the connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ManagerCommand::Disconnect).await;
    }

    /// Send one text payload over the managed link
    pub(crate) async fn send(&self, text: String) -> Result<(), TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::Send {
                text,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::ManagerGone)?;
        reply_rx.await.map_err(|_| TransportError::ManagerGone)?
    }
}

/// Owns the transport and drives the connection lifecycle
pub struct ConnectionManager<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    state: ConnectionState,
    /// Endpoint of the current or most recent connect request
    endpoint: Option<Endpoint>,
    /// Reconnect attempts made since the last Connected transition
    attempts: u32,
    /// When the next scheduled reconnect attempt fires
    reconnect_at: Option<Instant>,
    /// Event stream of the currently open link
    link_rx: Option<mpsc::Receiver<TransportEvent>>,
    cmd_rx: mpsc::Receiver<ManagerCommand>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<RelayEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager and the handle for talking to it
    pub fn new(
        transport: T,
        policy: ReconnectPolicy,
        events: broadcast::Sender<RelayEvent>,
    ) -> (Self, ConnectionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let manager = Self {
            transport,
            policy,
            state: ConnectionState::Disconnected,
            endpoint: None,
            attempts: 0,
            reconnect_at: None,
            link_rx: None,
            cmd_rx,
            state_tx,
            events,
        };
        let handle = ConnectionHandle { cmd_tx, state_rx };

        (manager, handle)
    }

    /// Run the manager, processing commands, link events, and reconnects
    pub async fn run(&mut self) {
        info!("connection manager started in Disconnected state");

        loop {
            let link_open = self.link_rx.is_some();
            let reconnect_pending = self.reconnect_at.is_some();
            let deadline = self.reconnect_at.unwrap_or_else(Instant::now);

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                event = Self::next_link_event(&mut self.link_rx), if link_open => {
                    self.handle_link_event(event).await;
                }
                _ = time::sleep_until(deadline), if reconnect_pending => {
                    self.attempt_reconnect().await;
                }
            }
        }

        // Teardown releases the link on this exit path too
        self.transport.disconnect().await;
        info!("connection manager stopped");
    }

    async fn next_link_event(
        link_rx: &mut Option<mpsc::Receiver<TransportEvent>>,
    ) -> Option<TransportEvent> {
        match link_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Connect { endpoint } => self.connect(endpoint).await,
            ManagerCommand::Disconnect => self.disconnect().await,
            ManagerCommand::Send { text, reply } => {
                let result = if self.state == ConnectionState::Connected {
                    self.transport.send(&text).await
                } else {
                    Err(TransportError::NotConnected)
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Caller-initiated connect. No-op when already connected or connecting
    /// to the same endpoint; resets the reconnect budget otherwise.
    async fn connect(&mut self, endpoint: Endpoint) {
        if self.endpoint.as_ref() == Some(&endpoint)
            && matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            debug!(%endpoint, "connect ignored, already connected or connecting");
            return;
        }

        self.release_link().await;
        self.reconnect_at = None;
        self.attempts = 0;
        self.endpoint = Some(endpoint);
        self.open().await;
    }

    /// Caller-initiated teardown: cancels any scheduled reconnect and
    /// releases the link.
    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.attempts = 0;
        self.release_link().await;

        if self.state != ConnectionState::Disconnected {
            self.set_state(
                ConnectionState::Disconnected,
                RelayEvent::Disconnected {
                    reason: "closed by caller".to_string(),
                },
            );
        }
    }

    /// Open a connection to the stored endpoint
    async fn open(&mut self) {
        let endpoint = match self.endpoint.clone() {
            Some(endpoint) => endpoint,
            None => return,
        };

        self.set_state(
            ConnectionState::Connecting,
            RelayEvent::Connecting {
                endpoint: endpoint.to_string(),
            },
        );

        match self.transport.connect(&endpoint).await {
            Ok(link_rx) => {
                self.link_rx = Some(link_rx);
                self.attempts = 0;
                self.set_state(
                    ConnectionState::Connected,
                    RelayEvent::Connected {
                        endpoint: endpoint.to_string(),
                    },
                );
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "connection attempt failed");
                self.publish(RelayEvent::ConnectFailed {
                    detail: e.to_string(),
                });
                self.set_state(
                    ConnectionState::Disconnected,
                    RelayEvent::Disconnected {
                        reason: "connect failed".to_string(),
                    },
                );
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_link_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Error { detail }) => {
                warn!(detail = %detail, "transport error on open link");
                self.publish(RelayEvent::ConnectionError { detail });
            }
            Some(TransportEvent::Closed { reason }) => {
                self.handle_unexpected_close(reason).await;
            }
            None => {
                self.handle_unexpected_close("transport event stream ended".to_string())
                    .await;
            }
        }
    }

    /// The link went down without a caller-initiated disconnect
    async fn handle_unexpected_close(&mut self, reason: String) {
        warn!(reason = %reason, "connection lost");
        self.release_link().await;
        self.set_state(
            ConnectionState::Disconnected,
            RelayEvent::Disconnected { reason },
        );
        self.schedule_reconnect();
    }

    /// Drop the link event stream and close the transport. Late events from
    /// the abandoned link have nowhere to go and are ignored.
    async fn release_link(&mut self) {
        self.link_rx = None;
        self.transport.disconnect().await;
    }

    fn schedule_reconnect(&mut self) {
        if self.attempts >= self.policy.max_attempts {
            warn!(
                attempts = self.attempts,
                "reconnect budget exhausted, explicit connect required"
            );
            self.publish(RelayEvent::ReconnectsExhausted {
                attempts: self.attempts,
            });
            self.reconnect_at = None;
            return;
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.reconnect_at = Some(Instant::now() + delay);
        self.publish(RelayEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay_ms: delay.as_millis() as u64,
        });
    }

    async fn attempt_reconnect(&mut self) {
        self.reconnect_at = None;
        info!(attempt = self.attempts, "reconnecting");
        self.open().await;
    }

    /// Perform a state transition, publishing it before anything else can
    /// observe a later one
    fn set_state(&mut self, next: ConnectionState, event: RelayEvent) {
        let prev = self.state;
        if prev == next {
            return;
        }

        info!(from = %prev, to = %next, "connection state transition");
        self.state = next;
        let _ = self.state_tx.send(next);
        self.publish(event);
    }

    fn publish(&self, event: RelayEvent) {
        debug!(?event, "publishing event");
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    /// Transport with scripted connect outcomes and recorded sends
    struct FakeTransport {
        /// Outcome per connect call; empty means succeed
        connect_outcomes: VecDeque<Result<(), TransportError>>,
        sent: Arc<Mutex<Vec<String>>>,
        connects: Arc<Mutex<u32>>,
        link_tx: Option<mpsc::Sender<TransportEvent>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                connect_outcomes: VecDeque::new(),
                sent: Arc::new(Mutex::new(Vec::new())),
                connects: Arc::new(Mutex::new(0)),
                link_tx: None,
            }
        }

        fn failing(times: usize) -> Self {
            let mut transport = Self::new();
            for _ in 0..times {
                transport
                    .connect_outcomes
                    .push_back(Err(TransportError::Connect("connection refused".into())));
            }
            transport
        }

        fn connect_count(&self) -> Arc<Mutex<u32>> {
            Arc::clone(&self.connects)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(
            &mut self,
            _endpoint: &Endpoint,
        ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
            *self.connects.lock().unwrap() += 1;
            if let Some(outcome) = self.connect_outcomes.pop_front() {
                outcome?;
            }
            let (link_tx, link_rx) = mpsc::channel(8);
            self.link_tx = Some(link_tx);
            Ok(link_rx)
        }

        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.link_tx = None;
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 8765)
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }

    fn create_manager(
        transport: FakeTransport,
        max_attempts: u32,
    ) -> (
        ConnectionManager<FakeTransport>,
        ConnectionHandle,
        broadcast::Receiver<RelayEvent>,
    ) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let (manager, handle) = ConnectionManager::new(transport, policy(max_attempts), event_tx);
        (manager, handle, event_rx)
    }

    fn drain(rx: &mut broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_backoff_delays_increase_and_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let (_, handle, _) = create_manager(FakeTransport::new(), 5);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_publishes_transitions_in_order() {
        let (mut manager, handle, mut events) = create_manager(FakeTransport::new(), 5);

        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;

        assert_eq!(handle.state(), ConnectionState::Connected);
        let events = drain(&mut events);
        assert!(matches!(events[0], RelayEvent::Connecting { .. }));
        assert!(matches!(events[1], RelayEvent::Connected { .. }));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_connected() {
        let transport = FakeTransport::new();
        let connects = transport.connect_count();
        let (mut manager, _, _) = create_manager(transport, 5);

        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;

        assert_eq!(*connects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_close_schedules_reconnect() {
        let (mut manager, handle, mut events) = create_manager(FakeTransport::new(), 5);
        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        drain(&mut events);

        manager
            .handle_link_event(Some(TransportEvent::Closed {
                reason: "connection closed by remote".into(),
            }))
            .await;

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(manager.reconnect_at.is_some());
        let events = drain(&mut events);
        assert!(matches!(events[0], RelayEvent::Disconnected { .. }));
        assert!(matches!(
            events[1],
            RelayEvent::ReconnectScheduled {
                attempt: 1,
                delay_ms: 1000
            }
        ));
    }

    #[tokio::test]
    async fn test_reconnect_delays_grow_until_exhaustion() {
        let (mut manager, handle, mut events) = create_manager(FakeTransport::failing(16), 3);

        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        let mut delays = Vec::new();
        for event in drain(&mut events) {
            if let RelayEvent::ReconnectScheduled { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }

        // Fire the scheduled attempts until the budget runs out
        let mut exhausted = false;
        while manager.reconnect_at.is_some() {
            manager.attempt_reconnect().await;
            for event in drain(&mut events) {
                match event {
                    RelayEvent::ReconnectScheduled { delay_ms, .. } => delays.push(delay_ms),
                    RelayEvent::ReconnectsExhausted { attempts } => {
                        assert_eq!(attempts, 3);
                        exhausted = true;
                    }
                    _ => {}
                }
            }
        }

        assert!(exhausted);
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_explicit_connect_resumes_after_exhaustion() {
        let transport = FakeTransport::failing(16);
        let connects = transport.connect_count();
        let (mut manager, handle, _) = create_manager(transport, 1);

        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        while manager.reconnect_at.is_some() {
            manager.attempt_reconnect().await;
        }
        let tries_before = *connects.lock().unwrap();
        assert_eq!(tries_before, 2); // initial try plus one reconnect

        // Terminal until the caller connects again; the budget resets
        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        assert_eq!(*connects.lock().unwrap(), tries_before + 1);
        assert_eq!(manager.attempts, 1); // failed again, first of a fresh budget
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_caller_disconnect_cancels_scheduled_reconnect() {
        let (mut manager, handle, mut events) = create_manager(FakeTransport::new(), 5);
        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        manager
            .handle_link_event(Some(TransportEvent::Closed {
                reason: "connection closed by remote".into(),
            }))
            .await;
        assert!(manager.reconnect_at.is_some());
        drain(&mut events);

        manager.handle_command(ManagerCommand::Disconnect).await;

        assert!(manager.reconnect_at.is_none());
        assert_eq!(manager.attempts, 0);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        let events = drain(&mut events);
        // Already Disconnected when the caller disconnects, so no extra transition
        assert!(!events
            .iter()
            .any(|e| matches!(e, RelayEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_rejected() {
        let (mut manager, _, _) = create_manager(FakeTransport::new(), 5);
        let sent = Arc::clone(&manager.transport.sent);

        let (reply_tx, reply_rx) = oneshot::channel();
        manager
            .handle_command(ManagerCommand::Send {
                text: "go north".into(),
                reply: reply_tx,
            })
            .await;

        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(TransportError::NotConnected)
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_connected_reaches_transport() {
        let (mut manager, _, _) = create_manager(FakeTransport::new(), 5);
        let sent = Arc::clone(&manager.transport.sent);

        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        let (reply_tx, reply_rx) = oneshot::channel();
        manager
            .handle_command(ManagerCommand::Send {
                text: "go north".into(),
                reply: reply_tx,
            })
            .await;

        assert!(reply_rx.await.unwrap().is_ok());
        assert_eq!(*sent.lock().unwrap(), vec!["go north".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_link_up() {
        let (mut manager, handle, mut events) = create_manager(FakeTransport::new(), 5);
        manager
            .handle_command(ManagerCommand::Connect {
                endpoint: endpoint(),
            })
            .await;
        drain(&mut events);

        manager
            .handle_link_event(Some(TransportEvent::Error {
                detail: "tls renegotiation".into(),
            }))
            .await;

        assert_eq!(handle.state(), ConnectionState::Connected);
        let events = drain(&mut events);
        assert!(matches!(events[0], RelayEvent::ConnectionError { .. }));
        assert_eq!(events.len(), 1);
    }
}
