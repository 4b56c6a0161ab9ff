//! Channel-backed recognizer
//!
//! Stands in for a real speech engine: whoever holds the `RecognizerDriver`
//! plays the engine and injects partial results, errors, and the end signal.
//! The console front end drives it from typed input; tests script it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Recognizer, RecognizerError, RecognizerEvent};

type Feed = Arc<Mutex<Option<mpsc::Sender<RecognizerEvent>>>>;

/// Recognizer whose engine events are injected through a [`RecognizerDriver`]
pub struct ChannelRecognizer {
    feed: Feed,
}

/// Engine-side handle for a [`ChannelRecognizer`]
#[derive(Clone)]
pub struct RecognizerDriver {
    feed: Feed,
}

impl ChannelRecognizer {
    pub fn new() -> (Self, RecognizerDriver) {
        let feed: Feed = Arc::new(Mutex::new(None));
        (
            Self { feed: feed.clone() },
            RecognizerDriver { feed },
        )
    }
}

#[async_trait]
impl Recognizer for ChannelRecognizer {
    async fn start(
        &mut self,
        locale: &str,
    ) -> Result<mpsc::Receiver<RecognizerEvent>, RecognizerError> {
        let (event_tx, event_rx) = mpsc::channel(16);
        {
            let mut feed = self.feed.lock().expect("recognizer feed poisoned");
            if feed.is_some() {
                return Err(RecognizerError::Start("capture already active".to_string()));
            }
            *feed = Some(event_tx.clone());
        }

        debug!(locale, "capture started");
        let _ = event_tx.send(RecognizerEvent::Started).await;
        Ok(event_rx)
    }

    async fn stop(&mut self) {
        // Finalizing ends the capture, so the feed slot is released here
        let feed = self.feed.lock().expect("recognizer feed poisoned").take();
        if let Some(feed) = feed {
            debug!("capture finalized");
            let _ = feed.send(RecognizerEvent::Ended).await;
        }
    }
}

impl RecognizerDriver {
    fn current_feed(&self) -> Option<mpsc::Sender<RecognizerEvent>> {
        self.feed.lock().expect("recognizer feed poisoned").clone()
    }

    /// Whether a capture is currently active
    pub fn is_active(&self) -> bool {
        self.current_feed().is_some()
    }

    /// Inject a partial recognition result into the active capture
    pub async fn partial(&self, alternatives: Vec<String>) {
        if let Some(feed) = self.current_feed() {
            let _ = feed.send(RecognizerEvent::Partial { alternatives }).await;
        }
    }

    /// Fail the active capture
    pub async fn error(&self, detail: impl Into<String>) {
        let feed = self.feed.lock().expect("recognizer feed poisoned").take();
        if let Some(feed) = feed {
            let _ = feed
                .send(RecognizerEvent::Error {
                    detail: detail.into(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_emits_started() {
        let (mut recognizer, _driver) = ChannelRecognizer::new();
        let mut events = recognizer.start("en-US").await.unwrap();
        assert!(matches!(events.recv().await, Some(RecognizerEvent::Started)));
    }

    #[tokio::test]
    async fn test_start_while_active_fails() {
        let (mut recognizer, _driver) = ChannelRecognizer::new();
        let _events = recognizer.start("en-US").await.unwrap();
        assert!(matches!(
            recognizer.start("en-US").await,
            Err(RecognizerError::Start(_))
        ));
    }

    #[tokio::test]
    async fn test_driver_feeds_partials_and_stop_ends() {
        let (mut recognizer, driver) = ChannelRecognizer::new();
        let mut events = recognizer.start("en-US").await.unwrap();
        assert!(matches!(events.recv().await, Some(RecognizerEvent::Started)));
        assert!(driver.is_active());

        driver.partial(vec!["go north".into()]).await;
        match events.recv().await {
            Some(RecognizerEvent::Partial { alternatives }) => {
                assert_eq!(alternatives, vec!["go north".to_string()]);
            }
            other => panic!("expected Partial, got {:?}", other),
        }

        recognizer.stop().await;
        assert!(matches!(events.recv().await, Some(RecognizerEvent::Ended)));
        assert!(!driver.is_active());
    }

    #[tokio::test]
    async fn test_error_releases_capture() {
        let (mut recognizer, driver) = ChannelRecognizer::new();
        let mut events = recognizer.start("en-US").await.unwrap();
        let _ = events.recv().await;

        driver.error("microphone denied").await;
        match events.recv().await {
            Some(RecognizerEvent::Error { detail }) => {
                assert_eq!(detail, "microphone denied");
            }
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(!driver.is_active());

        // A new capture can begin after the failure
        assert!(recognizer.start("en-US").await.is_ok());
    }
}
