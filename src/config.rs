//! Client configuration
//!
//! Endpoints and broker settings for the chat client. Settings are stored in
//! JSON format and can be loaded/saved from disk; a missing or empty file yields
//! the defaults, which match the marketplace's development backend.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`ChatConfig::api_base_url`]
pub const API_URL_ENV: &str = "TEXTBOOK_API_URL";

/// How the STOMP stream is carried over the WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportFraming {
    /// SockJS WebSocket transport (`/{server}/{session}/websocket`, `a[...]` frames)
    #[serde(rename = "sockjs")]
    SockJs,
    /// Plain WebSocket, one STOMP stream per text message
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Chat client configuration
///
/// # Example
/// ```rust,no_run
/// use textbook_chat::config::ChatConfig;
///
/// let config = ChatConfig::load("chat.json").expect("Failed to load");
/// println!("History from {}", config.api_base_url);
/// println!("Broker at {}", config.broker_url());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// REST API base URL (e.g. `http://localhost:8080/api`)
    pub api_base_url: String,
    /// Broker endpoint path, relative to the API base
    pub broker_path: String,
    /// Framing used on the broker socket
    pub framing: TransportFraming,
    /// Query parameter carrying the credential on the handshake URL
    pub token_query_param: String,
    /// Shared broadcast topic carrying every chat message
    pub topic: String,
    /// Destination that accepts published chat messages
    pub publish_destination: String,
    /// Fixed delay between reconnect attempts in milliseconds (0 disables reconnect)
    pub reconnect_delay_ms: u64,
    /// Outgoing heart-beat interval offered to the broker in milliseconds (0 disables)
    pub heartbeat_outgoing_ms: u64,
    /// Incoming heart-beat interval requested from the broker in milliseconds (0 disables)
    pub heartbeat_incoming_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            broker_path: "/ws".to_string(),
            framing: TransportFraming::SockJs,
            token_query_param: "token".to_string(),
            topic: "/topic/messages".to_string(),
            publish_destination: "/app/chat".to_string(),
            reconnect_delay_ms: 5_000,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
        }
    }
}

impl ChatConfig {
    /// Load configuration from a JSON file
    ///
    /// Returns the defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file, creating parent directories
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self
    }

    /// Check that URLs parse and destinations are usable
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("Invalid api_base_url {}: {}", self.api_base_url, e)))?;

        match base.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(Error::Config(format!("Unsupported URL scheme: {}", other)));
            }
        }

        if self.topic.trim().is_empty() || self.publish_destination.trim().is_empty() {
            return Err(Error::Config("Topic and publish destination must be set".to_string()));
        }

        if self.token_query_param.trim().is_empty() {
            return Err(Error::Config("token_query_param must be set".to_string()));
        }

        Ok(())
    }

    /// API base without a trailing slash
    pub fn api_base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Full broker endpoint URL as configured (http/https scheme for SockJS)
    pub fn broker_url(&self) -> String {
        let path = self.broker_path.trim_start_matches('/');
        format!("{}/{}", self.api_base(), path)
    }

    /// Reconnect delay, or `None` when reconnect is disabled
    pub fn reconnect_delay(&self) -> Option<Duration> {
        if self.reconnect_delay_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.reconnect_delay_ms))
        }
    }
}
