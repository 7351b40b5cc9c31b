//! Chat session manager
//!
//! One [`ChatSession`] backs one open conversation view. It owns the live
//! broker connection for that view, loads the conversation history once,
//! merges both into an append-only message list and exposes a send operation
//! gated on the connection state.
//!
//! The merge and filtering rules live in [`SessionState`], which is plain data
//! and can be driven directly; [`ChatSession`] wires it to the transport and
//! history tasks.

use crate::{
    api::{ApiClient, HistorySource},
    config::ChatConfig,
    credential::Credential,
    protocol::{ChatMessage, ConnectionState, Conversation},
    transport::{StompTransport, TransportCommand, TransportEvent, TransportHandle},
    Error, Result,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time copy of a session for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    /// Conversation shown
    pub conversation: Conversation,
    /// Live connection state
    pub connection: ConnectionState,
    /// Messages in display order
    pub messages: Vec<ChatMessage>,
    /// Whether the history request has resolved (successfully or not)
    pub history_loaded: bool,
    /// Mutation counter at the time of the snapshot
    pub revision: u64,
}

/// Message list and connection state of one conversation
///
/// Every method returns whether it changed the state; once closed, nothing does.
#[derive(Debug)]
pub struct SessionState {
    conversation: Conversation,
    connection: ConnectionState,
    messages: Vec<ChatMessage>,
    history_loaded: bool,
    /// Live messages that arrived before history resolved
    early_live: Vec<ChatMessage>,
    closed: bool,
    revision: u64,
}

impl SessionState {
    /// Fresh state for `conversation`: disconnected, history not loaded
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            connection: ConnectionState::Disconnected,
            messages: Vec::new(),
            history_loaded: false,
            early_live: Vec::new(),
            closed: false,
            revision: 0,
        }
    }

    /// Conversation this state belongs to
    pub fn conversation(&self) -> Conversation {
        self.conversation
    }

    /// Current connection state
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Visible messages
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether history has resolved
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Number of mutations applied so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the session was torn down
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn touch(&mut self) -> bool {
        self.revision += 1;
        true
    }

    /// Replace the connection state
    pub fn set_connection(&mut self, connection: ConnectionState) -> bool {
        if self.closed || self.connection == connection {
            return false;
        }
        info!(
            "Conversation {}<->{}: {} -> {}",
            self.conversation.local, self.conversation.remote, self.connection, connection
        );
        self.connection = connection;
        self.touch()
    }

    /// Offer a message from the broadcast topic
    ///
    /// Messages of other conversations are discarded. Accepted messages are
    /// appended, or held back until history resolves. Identical messages are
    /// not collapsed.
    pub fn accept_live(&mut self, message: ChatMessage) -> bool {
        if self.closed || !self.conversation.accepts(&message) {
            return false;
        }

        if self.history_loaded {
            self.messages.push(message);
        } else {
            debug!("Holding live message until history resolves");
            self.early_live.push(message);
        }
        self.touch()
    }

    /// Install the history result
    ///
    /// A failed fetch counts as an empty history. Live messages that arrived
    /// earlier are appended after it, except one copy per matching history record.
    pub fn apply_history(&mut self, result: Result<Vec<ChatMessage>>) -> bool {
        if self.closed || self.history_loaded {
            return false;
        }

        let history = match result {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    "History for {}<->{} unavailable, showing empty conversation: {}",
                    self.conversation.local, self.conversation.remote, e
                );
                Vec::new()
            }
        };

        let early = std::mem::take(&mut self.early_live);
        // Each history record absorbs at most one live copy of itself.
        let mut absorbed = vec![false; history.len()];
        self.messages = history;
        for message in early {
            let present = absorbed
                .iter()
                .zip(&self.messages)
                .position(|(used, h)| !*used && h.same_record(&message));
            if let Some(index) = present {
                debug!("Live message already present in history");
                absorbed[index] = true;
                continue;
            }
            self.messages.push(message);
        }

        self.history_loaded = true;
        self.touch()
    }

    /// Apply an event from the transport
    pub fn apply_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connecting => self.set_connection(ConnectionState::Connecting),
            TransportEvent::Connected => self.set_connection(ConnectionState::Connected),
            TransportEvent::Message(body) => match ChatMessage::from_json(&body) {
                Ok(message) => self.accept_live(message),
                Err(e) => {
                    debug!("Discarding undecodable broadcast: {}", e);
                    false
                }
            },
            TransportEvent::Failed(e) => self.set_connection(ConnectionState::Errored(e.to_string())),
            TransportEvent::Disconnected => {
                if matches!(self.connection, ConnectionState::Errored(_)) {
                    false
                } else {
                    self.set_connection(ConnectionState::Disconnected)
                }
            }
        }
    }

    /// Check whether a send of `content` may be published right now
    pub fn check_send(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::EmptySendRejected);
        }
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if !self.connection.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Mark torn down; the last mutation this state accepts
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.connection = ConnectionState::Disconnected;
        self.closed = true;
        self.touch()
    }

    /// Copy for rendering
    pub fn view(&self) -> ConversationView {
        ConversationView {
            conversation: self.conversation,
            connection: self.connection.clone(),
            messages: self.messages.clone(),
            history_loaded: self.history_loaded,
            revision: self.revision,
        }
    }
}

struct Shared {
    state: Mutex<SessionState>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on the state and publish the revision if it changed anything
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SessionState) -> bool,
    {
        let mut state = self.lock();
        let changed = f(&mut state);
        if changed {
            self.revision.send_replace(state.revision());
        }
        changed
    }
}

/// Live chat session for one conversation view
///
/// # Example
/// ```rust,no_run
/// use textbook_chat::config::ChatConfig;
/// use textbook_chat::credential::Credential;
/// use textbook_chat::protocol::{Conversation, UserId};
/// use textbook_chat::session::ChatSession;
///
/// # async fn example() -> textbook_chat::Result<()> {
/// let config = ChatConfig::default();
/// let credential = Credential::from_env("TEXTBOOK_TOKEN");
/// let mut session = ChatSession::open(&config, Conversation::new(UserId(1), UserId(2)), credential);
///
/// let mut changes = session.watch();
/// changes.changed().await.ok();
/// if session.connection_state().is_connected() {
///     session.send("Is the calculus book still available?")?;
/// }
///
/// session.teardown();
/// # Ok(())
/// # }
/// ```
pub struct ChatSession {
    conversation: Conversation,
    shared: Arc<Shared>,
    commands: Option<mpsc::UnboundedSender<TransportCommand>>,
    publish_destination: String,
    tasks: Vec<JoinHandle<()>>,
    transport_task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Open a session against the configured backend
    ///
    /// Without a credential the session starts in the errored state and never
    /// connects. Must be called from within a tokio runtime.
    pub fn open(
        config: &ChatConfig,
        conversation: Conversation,
        credential: Option<Credential>,
    ) -> Self {
        let Some(credential) = credential else {
            warn!(
                "No credential for conversation {}<->{}, not connecting",
                conversation.local, conversation.remote
            );
            return Self::failed(conversation, Error::NoCredential, &config.publish_destination);
        };

        let api = match ApiClient::new(config, credential.clone()) {
            Ok(api) => api,
            Err(e) => return Self::failed(conversation, e, &config.publish_destination),
        };

        let transport = StompTransport::activate(config.clone(), credential);
        Self::start(
            conversation,
            Arc::new(api),
            transport,
            config.publish_destination.clone(),
        )
    }

    /// Start a session from an explicit history source and transport
    pub fn start<H: HistorySource>(
        conversation: Conversation,
        history: Arc<H>,
        transport: TransportHandle,
        publish_destination: String,
    ) -> Self {
        let mut state = SessionState::new(conversation);
        state.set_connection(ConnectionState::Connecting);
        let (revision, _) = watch::channel(state.revision());
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            revision,
        });

        let (commands, mut events, transport_task) = transport.into_parts();

        let pump_shared = shared.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump_shared.update(|state| state.apply_event(event));
                if pump_shared.lock().is_closed() {
                    break;
                }
            }
            debug!("Transport event stream ended");
        });

        let history_shared = shared.clone();
        let history_task = tokio::spawn(async move {
            let result = history.fetch_history(conversation).await;
            if !history_shared.update(|state| state.apply_history(result)) {
                debug!("History result discarded");
            }
        });

        info!(
            "Chat session opened for {}<->{}",
            conversation.local, conversation.remote
        );

        Self {
            conversation,
            shared,
            commands: Some(commands),
            publish_destination,
            tasks: vec![pump, history_task],
            transport_task,
        }
    }

    fn failed(conversation: Conversation, error: Error, publish_destination: &str) -> Self {
        let mut state = SessionState::new(conversation);
        state.set_connection(ConnectionState::Errored(error.to_string()));
        let (revision, _) = watch::channel(state.revision());
        Self {
            conversation,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                revision,
            }),
            commands: None,
            publish_destination: publish_destination.to_string(),
            tasks: Vec::new(),
            transport_task: None,
        }
    }

    /// Conversation of this session
    pub fn conversation(&self) -> Conversation {
        self.conversation
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection().clone()
    }

    /// Copy of the current view
    pub fn snapshot(&self) -> ConversationView {
        self.shared.lock().view()
    }

    /// Receiver notified with the revision after every change
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Publish `content` to the peer
    ///
    /// Nothing is added to the view here; the message shows up when the
    /// broker echoes it back on the topic.
    pub fn send(&self, content: &str) -> Result<()> {
        if let Err(e) = self.shared.lock().check_send(content) {
            debug!("Send rejected locally: {}", e);
            return Err(e);
        }

        let commands = self.commands.as_ref().ok_or(Error::NotConnected)?;
        let body = self.conversation.outgoing(content).to_json()?;
        commands
            .send(TransportCommand::Publish {
                destination: self.publish_destination.clone(),
                body,
            })
            .map_err(|_| Error::Transport("Connection task has stopped".to_string()))?;

        debug!(
            "Published message to {} for {}",
            self.publish_destination, self.conversation.remote
        );
        Ok(())
    }

    /// Close the view: stop all state changes and deactivate the connection
    pub fn teardown(&mut self) {
        if self.shared.update(|state| state.close()) {
            info!(
                "Chat session closed for {}<->{}",
                self.conversation.local, self.conversation.remote
            );
        }

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(TransportCommand::Deactivate);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // The connection task finishes on its own after sending DISCONNECT.
        self.transport_task.take();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
