//! REST client for the message delivery service
//!
//! Two read endpoints are used by the chat client:
//! - `GET /messages/between/{localId}/{remoteId}`: full history of one conversation
//! - `GET /messages/received/{userId}`: every message received by a user (inbox)

use crate::{
    config::ChatConfig,
    credential::Credential,
    protocol::{ChatMessage, Conversation, UserId},
    Error, Result,
};
use std::future::Future;
use tracing::{debug, info, warn};

/// Source of conversation history for a chat session
///
/// Implemented by [`ApiClient`]; tests substitute their own source to control
/// when history resolves.
pub trait HistorySource: Send + Sync + 'static {
    /// Fetch the ordered history of `conversation`
    fn fetch_history(
        &self,
        conversation: Conversation,
    ) -> impl Future<Output = Result<Vec<ChatMessage>>> + Send;
}

/// HTTP client for the marketplace message endpoints
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl ApiClient {
    /// Create a client authenticated with `credential`
    pub fn new(config: &ChatConfig, credential: Credential) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_base().to_string(),
            credential,
        })
    }

    /// Messages exchanged between two users, oldest first
    pub async fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<ChatMessage>> {
        let url = format!("{}/messages/between/{}/{}", self.base_url, a, b);
        self.get_messages(&url).await
    }

    /// Messages received by `user`, oldest first
    pub async fn messages_received(&self, user: UserId) -> Result<Vec<ChatMessage>> {
        let url = format!("{}/messages/received/{}", self.base_url, user);
        self.get_messages(&url).await
    }

    async fn get_messages(&self, url: &str) -> Result<Vec<ChatMessage>> {
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer_header())
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!("GET {} returned status {}", url, status);
            return Err(Error::Fetch(format!("{} returned status {}", url, status)));
        }

        let messages: Vec<ChatMessage> = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("Invalid message list from {}: {}", url, e)))?;

        info!("Fetched {} messages from {}", messages.len(), url);
        Ok(messages)
    }
}

impl HistorySource for ApiClient {
    fn fetch_history(
        &self,
        conversation: Conversation,
    ) -> impl Future<Output = Result<Vec<ChatMessage>>> + Send {
        self.messages_between(conversation.local, conversation.remote)
    }
}
