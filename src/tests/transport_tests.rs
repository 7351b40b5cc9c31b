use crate::api::HistorySource;
use crate::config::{ChatConfig, TransportFraming};
use crate::credential::Credential;
use crate::protocol::{ChatMessage, ConnectionState, Conversation, UserId};
use crate::session::{ChatSession, ConversationView};
use crate::sockjs;
use crate::stomp::{Command, Frame, FrameDecoder};
use crate::transport::*;
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TOKEN: &str = "secret-token";

/// How the stub broker reacts
#[derive(Debug, Clone, Copy, PartialEq)]
enum Behavior {
    /// Accept, subscribe, echo every SEND back on the topic
    Echo,
    /// Answer CONNECT with an ERROR frame
    RejectConnect,
    /// Send an ERROR frame right after SUBSCRIBE
    ErrorAfterSubscribe,
    /// Drop the first connection right after SUBSCRIBE, echo on later ones
    DropFirstAfterSubscribe,
}

#[derive(Clone, Default)]
struct BrokerLog {
    uris: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<Command>>>,
    connections: Arc<AtomicUsize>,
}

impl BrokerLog {
    fn uris(&self) -> Vec<String> {
        self.uris.lock().expect("log lock").clone()
    }

    fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("log lock").clone()
    }
}

struct NoHistory;

/// History source counting how often it is asked
#[derive(Default)]
struct CountingHistory {
    fetches: AtomicUsize,
}

impl HistorySource for CountingHistory {
    fn fetch_history(
        &self,
        _conversation: Conversation,
    ) -> impl Future<Output = Result<Vec<ChatMessage>>> + Send {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        async { Ok(Vec::new()) }
    }
}

impl HistorySource for NoHistory {
    fn fetch_history(
        &self,
        _conversation: Conversation,
    ) -> impl Future<Output = Result<Vec<ChatMessage>>> + Send {
        async { Ok(Vec::new()) }
    }
}

async fn spawn_broker(behavior: Behavior, framing: TransportFraming) -> (SocketAddr, BrokerLog) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub broker");
    let addr = listener.local_addr().expect("Failed to get local address");
    let log = BrokerLog::default();

    let accept_log = log.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let connection = accept_log.connections.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(serve(stream, connection, behavior, framing, accept_log.clone()));
        }
    });

    (addr, log)
}

async fn reply(ws: &mut WebSocketStream<TcpStream>, framing: TransportFraming, frame: Frame) {
    let encoded = frame.encode();
    let text = match framing {
        TransportFraming::WebSocket => encoded,
        TransportFraming::SockJs => format!("a{}", sockjs::encode(&encoded).expect("encode")),
    };
    let _ = ws.send(Message::Text(text)).await;
}

async fn serve(
    stream: TcpStream,
    connection: usize,
    behavior: Behavior,
    framing: TransportFraming,
    log: BrokerLog,
) {
    let uris = log.uris.clone();
    let record_uri = move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        uris.lock().expect("log lock").push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record_uri).await else {
        return;
    };

    if framing == TransportFraming::SockJs {
        let _ = ws.send(Message::Text("o".to_string())).await;
    }

    let mut decoder = FrameDecoder::new();
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let payloads = match framing {
            TransportFraming::WebSocket => vec![text],
            TransportFraming::SockJs => serde_json::from_str::<Vec<String>>(&text).unwrap_or_default(),
        };

        for payload in payloads {
            for frame in decoder.push(&payload).expect("client sent invalid STOMP") {
                log.commands.lock().expect("log lock").push(frame.command);

                match (frame.command, behavior) {
                    (Command::Connect, Behavior::RejectConnect) => {
                        let error = Frame::new(Command::Error).header("message", "Access denied");
                        reply(&mut ws, framing, error).await;
                        return;
                    }
                    (Command::Connect, _) => {
                        let connected = Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", "0,0");
                        reply(&mut ws, framing, connected).await;
                    }
                    (Command::Subscribe, Behavior::ErrorAfterSubscribe) => {
                        let error = Frame::new(Command::Error).header("message", "Broker overloaded");
                        reply(&mut ws, framing, error).await;
                        return;
                    }
                    (Command::Subscribe, Behavior::DropFirstAfterSubscribe) if connection == 1 => {
                        return;
                    }
                    (Command::Subscribe, _) => {
                        // Traffic of another conversation on the shared topic
                        let foreign = ChatMessage::new(UserId(3), UserId(4), "not for you");
                        let body = serde_json::to_string(&foreign).expect("encode");
                        reply(&mut ws, framing, topic_message(&body)).await;
                    }
                    (Command::Send, _) => {
                        reply(&mut ws, framing, topic_message(&frame.body)).await;
                    }
                    (Command::Disconnect, _) => return,
                    _ => {}
                }
            }
        }
    }
}

fn topic_message(body: &str) -> Frame {
    Frame::new(Command::Message)
        .header("destination", "/topic/messages")
        .header("subscription", SUBSCRIPTION_ID)
        .header("message-id", "m-1")
        .header("content-type", "application/json")
        .body(body)
}

fn config(addr: SocketAddr, framing: TransportFraming) -> ChatConfig {
    ChatConfig {
        api_base_url: format!("http://{}/api", addr),
        framing,
        reconnect_delay_ms: 0,
        heartbeat_outgoing_ms: 0,
        heartbeat_incoming_ms: 0,
        ..ChatConfig::default()
    }
}

fn open(config: &ChatConfig) -> ChatSession {
    let credential = Credential::new(TOKEN).expect("non-empty token");
    let transport = StompTransport::activate(config.clone(), credential);
    ChatSession::start(
        Conversation::new(UserId(1), UserId(2)),
        Arc::new(NoHistory),
        transport,
        config.publish_destination.clone(),
    )
}

async fn wait_for<F>(session: &ChatSession, condition: F) -> ConversationView
where
    F: Fn(&ConversationView) -> bool,
{
    let mut changes = session.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = session.snapshot();
            if condition(&view) {
                return view;
            }
            changes.changed().await.expect("session state dropped");
        }
    })
    .await
    .expect("timed out waiting for session state")
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for broker")
}

async fn next_event(events: &mut UnboundedReceiver<TransportEvent>) -> Option<TransportEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for transport")
}

#[test]
fn test_handshake_url_carries_token() {
    let credential = Credential::new(TOKEN).expect("token");
    let mut config = ChatConfig::default();
    config.framing = TransportFraming::WebSocket;

    let url = handshake_url(&config, &credential).expect("valid URL");
    assert_eq!(url.as_str(), "ws://localhost:8080/api/ws?token=secret-token");

    let safe = redacted(&url);
    assert_eq!(safe, "ws://localhost:8080/api/ws");
    assert!(!safe.contains(TOKEN));
}

#[test]
fn test_sockjs_handshake_url_shape() {
    let credential = Credential::new(TOKEN).expect("token");
    let config = ChatConfig {
        api_base_url: "https://books.example.edu/api".to_string(),
        token_query_param: "access_token".to_string(),
        ..ChatConfig::default()
    };

    let url = handshake_url(&config, &credential).expect("valid URL");
    assert_eq!(url.scheme(), "wss");
    assert_eq!(url.query(), Some("access_token=secret-token"));

    let segments: Vec<&str> = url.path_segments().expect("path").collect();
    assert_eq!(segments.len(), 5);
    assert_eq!(&segments[..2], &["api", "ws"]);
    assert_eq!(segments[4], "websocket");
    assert!(!redacted(&url).contains(TOKEN));
}

#[tokio::test]
async fn test_echo_round_trip_over_websocket() {
    let (addr, log) = spawn_broker(Behavior::Echo, TransportFraming::WebSocket).await;
    let mut session = open(&config(addr, TransportFraming::WebSocket));

    wait_for(&session, |v| v.connection.is_connected() && v.history_loaded).await;
    session.send("hello").expect("send accepted");

    let view = wait_for(&session, |v| !v.messages.is_empty()).await;
    assert_eq!(view.messages.len(), 1, "Foreign conversation must be filtered out");
    assert_eq!(view.messages[0].content, "hello");
    assert_eq!(view.messages[0].sender_id, UserId(1));
    assert_eq!(view.messages[0].receiver_id, UserId(2));

    let uris = log.uris();
    assert_eq!(uris, vec!["/api/ws?token=secret-token".to_string()]);

    session.teardown();
    wait_until(|| log.commands().contains(&Command::Disconnect)).await;
    assert_eq!(
        log.commands(),
        vec![Command::Connect, Command::Subscribe, Command::Send, Command::Disconnect]
    );
}

#[tokio::test]
async fn test_echo_round_trip_over_sockjs() {
    let (addr, log) = spawn_broker(Behavior::Echo, TransportFraming::SockJs).await;
    let mut session = open(&config(addr, TransportFraming::SockJs));

    wait_for(&session, |v| v.connection.is_connected()).await;
    session.send("is the book still available?").expect("send accepted");

    let view = wait_for(&session, |v| !v.messages.is_empty()).await;
    assert_eq!(view.messages[0].content, "is the book still available?");

    let uri = log.uris().pop().expect("handshake recorded");
    assert!(uri.starts_with("/api/ws/"));
    assert!(uri.ends_with("/websocket?token=secret-token"));

    session.teardown();
}

#[tokio::test]
async fn test_error_frame_on_connect_is_handshake_failure() {
    let (addr, _log) = spawn_broker(Behavior::RejectConnect, TransportFraming::WebSocket).await;
    let session = open(&config(addr, TransportFraming::WebSocket));

    let view = wait_for(&session, |v| matches!(v.connection, ConnectionState::Errored(_))).await;
    assert_eq!(
        view.connection,
        ConnectionState::Errored("Handshake failed: Access denied".to_string())
    );
    assert!(session.send("hello").is_err());
}

#[tokio::test]
async fn test_error_frame_after_subscribe_is_protocol_error() {
    let (addr, _log) = spawn_broker(Behavior::ErrorAfterSubscribe, TransportFraming::WebSocket).await;
    let session = open(&config(addr, TransportFraming::WebSocket));

    let view = wait_for(&session, |v| matches!(v.connection, ConnectionState::Errored(_))).await;
    assert_eq!(
        view.connection,
        ConnectionState::Errored("Protocol error: Broker overloaded".to_string())
    );
}

#[tokio::test]
async fn test_unreachable_broker_is_handshake_failure() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        listener.local_addr().expect("Failed to get local address")
    };
    let session = open(&config(addr, TransportFraming::WebSocket));

    let view = wait_for(&session, |v| matches!(v.connection, ConnectionState::Errored(_))).await;
    let ConnectionState::Errored(reason) = view.connection else {
        unreachable!();
    };
    assert!(reason.starts_with("Handshake failed"));
    assert!(!reason.contains(TOKEN), "Credential leaked into error: {}", reason);
}

#[tokio::test]
async fn test_reconnects_after_fixed_delay() {
    let (addr, log) = spawn_broker(Behavior::RejectConnect, TransportFraming::WebSocket).await;
    let mut config = config(addr, TransportFraming::WebSocket);
    config.reconnect_delay_ms = 50;
    let mut session = open(&config);

    wait_until(|| log.connections.load(Ordering::SeqCst) >= 3).await;

    session.teardown();
    // Deactivation stops further attempts
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_teardown = log.connections.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.connections.load(Ordering::SeqCst), after_teardown);
}

#[tokio::test]
async fn test_reconnect_resubscribes_without_refetching_history() {
    let (addr, log) = spawn_broker(Behavior::DropFirstAfterSubscribe, TransportFraming::WebSocket).await;
    let mut config = config(addr, TransportFraming::WebSocket);
    config.reconnect_delay_ms = 100;

    let history = Arc::new(CountingHistory::default());
    let credential = Credential::new(TOKEN).expect("token");
    let transport = StompTransport::activate(config.clone(), credential);
    let mut session = ChatSession::start(
        Conversation::new(UserId(1), UserId(2)),
        history.clone(),
        transport,
        config.publish_destination.clone(),
    );

    // First connection drops after subscribing
    wait_for(&session, |v| matches!(v.connection, ConnectionState::Errored(_))).await;
    let view = wait_for(&session, |v| v.connection.is_connected() && v.history_loaded).await;
    assert!(view.messages.is_empty());

    session.send("back online").expect("send accepted");
    let view = wait_for(&session, |v| !v.messages.is_empty()).await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].content, "back online");

    assert_eq!(log.connections.load(Ordering::SeqCst), 2);
    assert_eq!(
        log.uris(),
        vec!["/api/ws?token=secret-token".to_string(); 2]
    );
    assert_eq!(
        log.commands(),
        vec![Command::Connect, Command::Subscribe, Command::Connect, Command::Subscribe, Command::Send]
    );
    assert_eq!(history.fetches.load(Ordering::SeqCst), 1);

    session.teardown();
}

#[tokio::test]
async fn test_teardown_during_handshake_closes_socket() {
    // Accepts TCP but never answers the WebSocket upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");
    let mut session = open(&config(addr, TransportFraming::WebSocket));

    let (mut socket, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("timed out waiting for client")
        .expect("accept failed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.connection_state(), ConnectionState::Connecting);

    session.teardown();

    let mut buf = [0u8; 1024];
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Socket still open after teardown");
}

#[tokio::test]
async fn test_deactivate_during_handshake_stops_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");
    let credential = Credential::new(TOKEN).expect("token");
    let mut config = config(addr, TransportFraming::WebSocket);
    config.reconnect_delay_ms = 50;
    let handle = StompTransport::activate(config, credential);
    let (commands, mut events, _task) = handle.into_parts();

    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Connecting)));
    let _pending = listener.accept().await.expect("accept failed");

    commands.send(TransportCommand::Deactivate).expect("transport alive");
    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Disconnected)));
    assert!(next_event(&mut events).await.is_none());
}

#[tokio::test]
async fn test_transport_reports_disconnected_after_deactivate() {
    let (addr, _log) = spawn_broker(Behavior::Echo, TransportFraming::WebSocket).await;
    let credential = Credential::new(TOKEN).expect("token");
    let handle = StompTransport::activate(config(addr, TransportFraming::WebSocket), credential);
    let (commands, mut events, _task) = handle.into_parts();

    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Connecting)));
    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Connected)));
    // Foreign broadcast sent by the stub right after SUBSCRIBE
    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Message(_))));

    commands.send(TransportCommand::Deactivate).expect("transport alive");
    assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Disconnected)));
    assert!(next_event(&mut events).await.is_none());
}
