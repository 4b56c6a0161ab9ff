//! Configuration loading and management
//!
//! All values are static, supplied at startup through environment variables
//! with defaults matching the original deployment: executor on port 8765,
//! five reconnect attempts starting at one second, en-US recognition.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::connection::ReconnectPolicy;
use crate::transport::Endpoint;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote executor endpoint
    pub endpoint: Endpoint,

    /// Bounded reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Locale passed to the recognition capability
    pub locale: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let host = env_or("RELAY_HOST", "127.0.0.1");
        let port: u16 = env_parse("RELAY_PORT", 8765)?;

        let reconnect = ReconnectPolicy {
            max_attempts: env_parse("RELAY_RECONNECT_MAX_ATTEMPTS", 5)?,
            base_delay: Duration::from_millis(env_parse("RELAY_RECONNECT_DELAY_MS", 1000)?),
            max_delay: Duration::from_millis(env_parse("RELAY_RECONNECT_MAX_DELAY_MS", 30_000)?),
        };

        Ok(Self {
            endpoint: Endpoint::new(host, port),
            reconnect,
            locale: env_or("RELAY_LOCALE", "en-US"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
