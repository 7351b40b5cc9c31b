//! Chat data model
//!
//! This module defines the records exchanged with the message delivery service:
//! - User identifiers and conversation pairs
//! - Inbound message records (history and live broadcast)
//! - The outbound publish payload
//! - Connection state reported to the presentation layer

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier assigned by the marketplace backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// Unordered pair of participants identifying one conversation
///
/// `(a, b)` and `(b, a)` produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    /// Build the key for the pair `{a, b}`
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Both participants, smaller id first
    pub fn participants(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }
}

/// A conversation as seen from the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversation {
    /// The local (signed-in) user
    pub local: UserId,
    /// The peer on the other side
    pub remote: UserId,
}

impl Conversation {
    /// Create a conversation between the local user and a peer
    pub fn new(local: UserId, remote: UserId) -> Self {
        Self { local, remote }
    }

    /// Unordered key of this conversation
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.local, self.remote)
    }

    /// Whether a message travelling between these two users, in either direction, belongs here
    pub fn accepts(&self, message: &ChatMessage) -> bool {
        message.conversation_key() == self.key()
    }

    /// Build the publish payload for a message from the local user to the peer
    pub fn outgoing(&self, content: &str) -> OutgoingMessage {
        OutgoingMessage {
            sender_id: self.local,
            receiver_id: self.remote,
            content: content.to_string(),
        }
    }
}

/// A message record as delivered by the history endpoint or the broadcast topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned identifier, absent on some echoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Author of the message
    pub sender_id: UserId,
    /// Display name of the author, when the server resolved one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Addressee of the message
    pub receiver_id: UserId,
    /// Text body
    pub content: String,
    /// Delivery time assigned by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

impl ChatMessage {
    /// Create a message without server-assigned fields
    pub fn new(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id,
            sender_name: None,
            receiver_id,
            content: content.into(),
            timestamp: None,
        }
    }

    /// Attach a server timestamp
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach a server identifier
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Unordered pair this message belongs to
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.receiver_id)
    }

    /// Whether `other` describes the same stored record
    ///
    /// Identifiers decide when both sides carry one; otherwise every field
    /// that the server echoes has to match.
    pub fn same_record(&self, other: &ChatMessage) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.sender_id == other.sender_id
                    && self.receiver_id == other.receiver_id
                    && self.content == other.content
                    && self.timestamp == other.timestamp
            }
        }
    }

    /// Decode a message from a JSON body
    pub fn from_json(data: &str) -> crate::Result<Self> {
        serde_json::from_str(data).map_err(crate::Error::JsonSerialization)
    }
}

/// Payload published to the broker's inbound chat destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Local user
    pub sender_id: UserId,
    /// Peer
    pub receiver_id: UserId,
    /// Text body
    pub content: String,
}

impl OutgoingMessage {
    /// Encode to a JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(crate::Error::JsonSerialization)
    }
}

/// Live connection state of a chat session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to connect
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Subscribed and able to publish
    Connected,
    /// The last attempt failed
    Errored(String),
}

impl ConnectionState {
    /// Sending is only possible while connected
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Errored(reason) => write!(f, "error: {}", reason),
        }
    }
}
