//! TUI (Terminal User Interface) module
//!
//! Terminal front-end for the chat client. Kept in the library so the screen
//! state and send/teardown behavior can be tested without a terminal.

pub mod types;
pub mod screens;
pub mod app;
pub mod ui;

pub use types::Screen;
pub use screens::{ChatViewScreen, InboxScreen};
pub use app::App;
