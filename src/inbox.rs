//! Received-messages inbox
//!
//! Summarises the messages a user has received into one entry per sender,
//! keeping each sender's most recent message, newest conversation first.

use crate::protocol::{ChatMessage, UserId};
use std::collections::HashMap;

/// Latest message received from one sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry {
    /// Sender of the conversation's latest message
    pub sender_id: UserId,
    /// Display name of the sender, if known
    pub sender_name: Option<String>,
    /// Most recent message from this sender
    pub last_message: ChatMessage,
}

impl InboxEntry {
    /// Label to show for the sender
    pub fn display_name(&self) -> String {
        self.sender_name
            .clone()
            .unwrap_or_else(|| format!("User {}", self.sender_id))
    }
}

/// Group received messages by sender and keep the latest of each
///
/// Messages without a timestamp sort before any timestamped one. On equal
/// timestamps the message seen first is kept.
pub fn latest_per_sender(messages: &[ChatMessage]) -> Vec<InboxEntry> {
    let mut latest: HashMap<UserId, &ChatMessage> = HashMap::new();

    for message in messages {
        latest
            .entry(message.sender_id)
            .and_modify(|current| {
                if message.timestamp > current.timestamp {
                    *current = message;
                }
            })
            .or_insert(message);
    }

    let mut entries: Vec<InboxEntry> = latest
        .into_values()
        .map(|message| InboxEntry {
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            last_message: message.clone(),
        })
        .collect();

    entries.sort_by(|a, b| {
        b.last_message
            .timestamp
            .cmp(&a.last_message.timestamp)
            .then(a.sender_id.cmp(&b.sender_id))
    });
    entries
}
