//! voice-relay: console client relaying voice and typed commands to a
//! remote executor
//!
//! The relay keeps one persistent TCP connection to the executor and turns
//! each utterance into a single validated command:
//! - ConnectionManager owns the link, its state, and bounded reconnection
//! - SpeechSession owns one recognition capture at a time and commits the
//!   finalized utterance over an explicit channel
//! - CommandDispatcher validates (trim, non-empty, connected) and performs
//!   the at-most-once send
//!
//! The speech engine is a capability; in this build the console plays the
//! engine through a `RecognizerDriver` (`:voice`, utterance lines, `:done`).

mod config;
mod connection;
mod dispatch;
mod events;
mod lifecycle;
mod recognizer;
mod speech;
mod transport;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionState};
use crate::dispatch::CommandDispatcher;
use crate::events::RelayEvent;
use crate::lifecycle::ShutdownSignal;
use crate::recognizer::{ChannelRecognizer, RecognizerDriver};
use crate::speech::{first_alternative, SessionError, SessionHandle, SpeechSession};
use crate::transport::{Endpoint, TcpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voice-relay starting");

    // Load configuration
    let config = Config::load()?;
    info!(endpoint = %config.endpoint, locale = %config.locale, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Channels for inter-component communication
    // All components -> status subscribers
    let (event_tx, _event_rx) = broadcast::channel::<RelayEvent>(64);
    // Speech session -> dispatcher (committed utterances)
    let (commit_tx, mut commit_rx) = mpsc::channel::<String>(8);

    // Create the components; the manager and session own their capabilities
    let (mut manager, conn) =
        ConnectionManager::new(TcpTransport::new(), config.reconnect.clone(), event_tx.clone());
    let (engine, driver) = ChannelRecognizer::new();
    let (mut session, session_handle) =
        SpeechSession::new(engine, first_alternative, commit_tx, event_tx.clone());
    let dispatcher = CommandDispatcher::new(conn.clone(), event_tx.clone());

    // Open the connection at startup
    conn.connect(config.endpoint.clone()).await;

    let mut status_rx = event_tx.subscribe();

    info!("relay initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the connection manager (owns the link and reconnection)
        _ = manager.run() => {
            info!("connection manager exited");
        }

        // Run the speech session (owns the capture lifecycle)
        _ = session.run() => {
            info!("speech session exited");
        }

        // Drive input and committed utterances into the dispatcher
        _ = console_loop(
            &dispatcher,
            &session_handle,
            &driver,
            &conn,
            &mut commit_rx,
            &config.endpoint,
            &config.locale,
        ) => {
            info!("console input closed");
        }

        // Print every relay event as a status line
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => println!("[relay] {}", event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "status receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("status printer exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");
    // The link releases itself on drop; nothing else holds resources
    info!("voice-relay stopped");

    Ok(())
}

/// Read stdin: plain lines are typed commands, `:`-prefixed lines are
/// controls, and lines during an active capture feed the recognizer as
/// partial results.
async fn console_loop(
    dispatcher: &CommandDispatcher,
    session: &SessionHandle,
    driver: &RecognizerDriver,
    conn: &ConnectionHandle,
    commit_rx: &mut mpsc::Receiver<String>,
    endpoint: &Endpoint,
    locale: &str,
) {
    println!(
        "voice-relay: type a command, or :voice / :done / :cancel / :connect / :disconnect / :quit"
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                if !handle_line(&line, dispatcher, session, driver, conn, endpoint, locale).await {
                    break;
                }
            }
            // A finished capture commits its utterance here
            Some(text) = commit_rx.recv() => {
                if let Err(e) = dispatcher.dispatch(&text).await {
                    println!("[relay] error: {}", e);
                }
            }
        }
    }
}

/// Returns false when the loop should exit
async fn handle_line(
    line: &str,
    dispatcher: &CommandDispatcher,
    session: &SessionHandle,
    driver: &RecognizerDriver,
    conn: &ConnectionHandle,
    endpoint: &Endpoint,
    locale: &str,
) -> bool {
    let input = line.trim();
    match input {
        "" => {}
        ":quit" => return false,
        ":connect" => conn.connect(endpoint.clone()).await,
        ":disconnect" => conn.disconnect().await,
        ":voice" => {
            // Connectivity precondition is the caller's to evaluate
            if conn.state() != ConnectionState::Connected {
                println!("[relay] error: {}", SessionError::NotReady);
            } else if let Err(e) = session.start(locale).await {
                println!("[relay] error: {}", e);
            } else {
                println!("[relay] capturing; type the utterance, then :done");
            }
        }
        ":done" => session.stop().await,
        ":cancel" => driver.error("capture cancelled").await,
        text if driver.is_active() => {
            driver.partial(vec![text.to_string()]).await;
        }
        text => {
            if let Err(e) = dispatcher.dispatch(text).await {
                println!("[relay] error: {}", e);
            }
        }
    }
    true
}
