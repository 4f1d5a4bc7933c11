//! Client configuration

use std::time::Duration;

use crate::realtime::ChannelConfig;
use crate::{ClientResult, HttpClient};

/// Connection settings for the order-storage service
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL (e.g., "http://localhost:8080/api")
    pub base_url: String,

    /// Realtime channel URL (e.g., "ws://localhost:8080/ws")
    pub ws_url: String,

    /// Bearer token, if the service requires one
    pub token: Option<String>,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Realtime channel behaviour
    pub channel: ChannelConfig,
}

impl ClientConfig {
    /// Create a configuration, deriving the ws URL from the http one
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let ws_url = format!(
            "{}/ws",
            base_url
                .trim_end_matches('/')
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1)
        );
        Self {
            base_url,
            ws_url,
            token: None,
            timeout: 10,
            channel: ChannelConfig::default(),
        }
    }

    /// Set the realtime channel URL
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the realtime channel behaviour
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Create an HTTP client from this configuration
    pub fn build_http_client(&self) -> ClientResult<HttpClient> {
        HttpClient::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}
