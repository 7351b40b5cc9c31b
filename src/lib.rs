//! Textbook Exchange chat client
//!
//! This library provides the real-time direct-messaging client used between
//! buyers and sellers on the Textbook Exchange marketplace: message history over
//! REST, live delivery over a STOMP broker, and a per-conversation session that
//! merges the two.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod credential;
pub mod inbox;
pub mod protocol;
pub mod session;
pub mod sockjs;
pub mod stomp;
pub mod transport;
pub mod tui;

#[cfg(test)]
mod tests;

/// Result type alias for chat client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for chat client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No bearer credential was supplied, so no connection can be attempted
    #[error("no credential available")]
    NoCredential,

    /// The broker connection could not be established
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The broker reported an error or sent an unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message history could not be retrieved
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Send was called with empty or whitespace-only content
    #[error("message content is empty")]
    EmptySendRejected,

    /// Send was called while the live connection is not established
    #[error("not connected")]
    NotConnected,

    /// The session has already been torn down
    #[error("session closed")]
    SessionClosed,

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize logging to stdout
pub fn init() {
    tracing_subscriber::fmt::init();
}

/// Initialize logging to a custom writer (e.g. a log file while the TUI owns the terminal)
pub fn init_with_writer<W>(writer: W)
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .init();
}
