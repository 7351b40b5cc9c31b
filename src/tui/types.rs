//! Core types for TUI screens and navigation

/// Application screens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Latest message from each sender
    Inbox,
    /// One live conversation
    ChatView,
}
