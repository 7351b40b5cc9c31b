//! Screen state for the TUI

use crate::inbox::InboxEntry;
use crate::protocol::UserId;

/// Inbox screen state
#[derive(Debug, Default)]
pub struct InboxScreen {
    /// One entry per sender, newest first
    pub entries: Vec<InboxEntry>,
    /// Highlighted entry
    pub selected_index: usize,
    /// Status message (load errors, hints)
    pub status_message: Option<String>,
}

impl InboxScreen {
    /// Create an inbox screen from loaded entries
    pub fn new(entries: Vec<InboxEntry>) -> Self {
        Self {
            entries,
            selected_index: 0,
            status_message: None,
        }
    }

    /// Move selection down
    pub fn next(&mut self) {
        if !self.entries.is_empty() {
            self.selected_index = (self.selected_index + 1) % self.entries.len();
        }
    }

    /// Move selection up
    pub fn previous(&mut self) {
        if !self.entries.is_empty() {
            self.selected_index = if self.selected_index == 0 {
                self.entries.len() - 1
            } else {
                self.selected_index - 1
            };
        }
    }

    /// Currently highlighted entry
    pub fn selected_entry(&self) -> Option<&InboxEntry> {
        self.entries.get(self.selected_index)
    }

    /// Set status message
    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
    }
}

/// Chat view screen state
#[derive(Debug)]
pub struct ChatViewScreen {
    /// Peer of the open conversation
    pub peer: UserId,
    /// Input buffer for message composition
    pub input: String,
    /// Messages scrolled up from the bottom (0 follows new messages)
    pub scroll_offset: usize,
    /// Status message
    pub status_message: Option<String>,
}

impl ChatViewScreen {
    /// Create new chat view screen
    pub fn new(peer: UserId) -> Self {
        Self {
            peer,
            input: String::new(),
            scroll_offset: 0,
            status_message: None,
        }
    }

    /// Add character to input
    pub fn add_char(&mut self, c: char) {
        self.input.push(c);
    }

    /// Remove last character from input
    pub fn backspace(&mut self) {
        self.input.pop();
    }

    /// Clear input buffer
    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Scroll towards older messages
    pub fn scroll_up(&mut self, max_offset: usize) {
        if self.scroll_offset < max_offset {
            self.scroll_offset += 1;
        }
    }

    /// Scroll towards newer messages
    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    /// Set status message
    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
    }
}
