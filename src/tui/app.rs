//! Main TUI application state and logic

use crate::api::ApiClient;
use crate::config::ChatConfig;
use crate::credential::Credential;
use crate::inbox;
use crate::protocol::{Conversation, UserId};
use crate::session::ChatSession;
use crate::tui::screens::{ChatViewScreen, InboxScreen};
use crate::tui::types::Screen;
use crate::{Error, Result};
use tokio::runtime::Handle;

/// Application state
pub struct App {
    /// Current screen
    pub current_screen: Screen,
    /// Signed-in user
    pub local_user: UserId,
    /// Should quit
    pub should_quit: bool,
    /// Inbox screen (when loaded)
    pub inbox_screen: Option<InboxScreen>,
    /// Chat view screen (when a conversation is open)
    pub chat_view_screen: Option<ChatViewScreen>,
    /// Live session of the open conversation
    pub session: Option<ChatSession>,
    config: ChatConfig,
    credential: Option<Credential>,
    runtime: Handle,
}

impl App {
    /// Create the application on the current tokio runtime
    pub fn new(config: ChatConfig, credential: Option<Credential>, local_user: UserId) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Transport(format!("No tokio runtime available: {}", e)))?;

        Ok(Self {
            current_screen: Screen::Inbox,
            local_user,
            should_quit: false,
            inbox_screen: None,
            chat_view_screen: None,
            session: None,
            config,
            credential,
            runtime,
        })
    }

    /// Fetch received messages and show the inbox
    pub fn show_inbox(&mut self) {
        self.close_chat();
        self.current_screen = Screen::Inbox;

        let Some(credential) = self.credential.clone() else {
            let mut screen = InboxScreen::default();
            screen.set_status(Error::NoCredential.to_string());
            self.inbox_screen = Some(screen);
            return;
        };

        // Called from the UI thread, which is not a runtime worker.
        let user = self.local_user;
        let loaded = ApiClient::new(&self.config, credential).map(|api| {
            self.runtime
                .block_on(async move { api.messages_received(user).await })
        });

        self.inbox_screen = Some(match loaded.and_then(|r| r) {
            Ok(messages) => InboxScreen::new(inbox::latest_per_sender(&messages)),
            Err(e) => {
                tracing::warn!("Inbox unavailable: {}", e);
                let mut screen = InboxScreen::default();
                screen.set_status(format!("Could not load messages: {}", e));
                screen
            }
        });
    }

    /// Open the conversation with `peer`
    pub fn open_chat(&mut self, peer: UserId) {
        self.close_chat();

        let _guard = self.runtime.enter();
        let session = ChatSession::open(
            &self.config,
            Conversation::new(self.local_user, peer),
            self.credential.clone(),
        );
        self.attach_session(session);
    }

    /// Show an already started session
    pub fn attach_session(&mut self, session: ChatSession) {
        self.chat_view_screen = Some(ChatViewScreen::new(session.conversation().remote));
        self.session = Some(session);
        self.current_screen = Screen::ChatView;
    }

    /// Open the conversation highlighted in the inbox
    pub fn open_selected(&mut self) {
        let peer = self
            .inbox_screen
            .as_ref()
            .and_then(|screen| screen.selected_entry())
            .map(|entry| entry.sender_id);

        if let Some(peer) = peer {
            self.open_chat(peer);
        }
    }

    /// Tear down the open conversation, if any
    pub fn close_chat(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
        self.chat_view_screen = None;
    }

    /// Send the composed message
    ///
    /// The input is cleared only when the message was handed to the broker.
    pub fn submit_message(&mut self) {
        let (Some(screen), Some(session)) = (self.chat_view_screen.as_mut(), self.session.as_ref()) else {
            return;
        };

        match session.send(&screen.input) {
            Ok(()) => {
                screen.clear_input();
                screen.status_message = None;
                screen.scroll_offset = 0;
            }
            Err(Error::EmptySendRejected) => {}
            Err(e) => screen.set_status(format!("Not sent: {}", e)),
        }
    }

    /// Leave the chat view for the inbox
    pub fn back_to_inbox(&mut self) {
        self.show_inbox();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.close_chat();
    }
}
