// Session configuration injected into the API client and the negotiation core

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ExchangeError, Result};

pub const DEFAULT_CHAT_POLL_INTERVAL_MS: u64 = 1500;
pub const DEFAULT_REFETCH_DELAY_MS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub chat_poll_interval_ms: u64,
    #[serde(default = "default_refetch_delay")]
    pub refetch_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_poll_interval() -> u64 {
    DEFAULT_CHAT_POLL_INTERVAL_MS
}

fn default_refetch_delay() -> u64 {
    DEFAULT_REFETCH_DELAY_MS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl SessionConfig {
    pub fn new(base_url: &str) -> Self {
        SessionConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: None,
            chat_poll_interval_ms: DEFAULT_CHAT_POLL_INTERVAL_MS,
            refetch_delay_ms: DEFAULT_REFETCH_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.session_token = Some(token.to_string());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.chat_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_refetch_delay(mut self, delay: Duration) -> Self {
        self.refetch_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The session token, or `MissingSession` when absent or blank.
    pub fn token(&self) -> Result<&str> {
        match self.session_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ExchangeError::MissingSession),
        }
    }

    pub fn chat_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chat_poll_interval_ms)
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
