//! Broker transport
//!
//! This module owns the live connection to the STOMP broker:
//! - WebSocket connect (plain or SockJS-framed) with the credential on the handshake URL
//! - STOMP `CONNECT`/`CONNECTED` handshake and the single topic subscription
//! - Publishing, heart-beats and `ERROR` frame handling
//! - Fixed-delay reconnect until deactivated
//!
//! The connection runs in its own task and talks to its owner only through a
//! [`TransportHandle`]: commands in, events out.

use crate::{
    config::{ChatConfig, TransportFraming},
    credential::Credential,
    sockjs::{self, SockJsFrame},
    stomp::{self, Command, Frame, FrameDecoder},
    Error, Result,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

/// Subscription id used for the broadcast topic
pub const SUBSCRIPTION_ID: &str = "sub-0";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Instructions from the session to the connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Publish a JSON body to a broker destination
    Publish {
        /// Broker destination (e.g. `/app/chat`)
        destination: String,
        /// JSON body
        body: String,
    },
    /// Disconnect and stop reconnecting
    Deactivate,
}

/// Notifications from the connection task to the session
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection attempt started
    Connecting,
    /// Handshake done and topic subscribed
    Connected,
    /// A `MESSAGE` frame body from the subscribed topic
    Message(String),
    /// The attempt failed; `Error::Handshake`, `Error::Protocol` or `Error::Transport`
    Failed(Error),
    /// The task stopped for good
    Disconnected,
}

/// Session-side end of a transport connection
pub struct TransportHandle {
    /// Command channel into the connection task
    pub commands: mpsc::UnboundedSender<TransportCommand>,
    /// Event channel out of the connection task
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

/// Connection-side end of a transport connection
pub struct TransportPeer {
    /// Commands sent by the session
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    /// Events delivered to the session
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandle {
    /// Create a connected handle/peer pair with no task attached
    ///
    /// Used by [`StompTransport`] and by alternative transports (or tests) that
    /// drive the peer side themselves.
    pub fn pair() -> (TransportHandle, TransportPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            TransportHandle {
                commands: command_tx,
                events: event_rx,
                task: None,
            },
            TransportPeer {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Split into the command sender, event receiver and connection task
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<TransportCommand>,
        mpsc::UnboundedReceiver<TransportEvent>,
        Option<JoinHandle<()>>,
    ) {
        (self.commands, self.events, self.task)
    }
}

/// STOMP-over-WebSocket transport
pub struct StompTransport;

impl StompTransport {
    /// Spawn the connection task and return its handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(config: ChatConfig, credential: Credential) -> TransportHandle {
        let (mut handle, peer) = TransportHandle::pair();
        handle.task = Some(tokio::spawn(run(config, credential, peer)));
        handle
    }
}

/// Why a connection cycle ended without error
enum Stop {
    Deactivated,
    OwnerGone,
}

async fn run(config: ChatConfig, credential: Credential, mut peer: TransportPeer) {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if peer.events.send(TransportEvent::Connecting).is_err() {
            break;
        }

        match connect_once(&config, &credential, &mut peer).await {
            Ok(Stop::Deactivated) => {
                info!("Broker connection deactivated");
                break;
            }
            Ok(Stop::OwnerGone) => {
                debug!("Session dropped, stopping broker connection");
                break;
            }
            Err(e) => {
                warn!("Broker connection attempt {} failed: {}", attempt, e);
                if peer.events.send(TransportEvent::Failed(e)).is_err() {
                    break;
                }
            }
        }

        let Some(delay) = config.reconnect_delay() else {
            info!("Reconnect disabled, giving up");
            break;
        };

        info!("Reconnecting to broker in {}ms", delay.as_millis());
        if wait_or_deactivate(delay, &mut peer.commands).await {
            break;
        }
    }

    let _ = peer.events.send(TransportEvent::Disconnected);
}

/// Sleep for `delay`; returns true if the owner deactivated meanwhile.
async fn wait_or_deactivate(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            command = commands.recv() => match command {
                Some(TransportCommand::Deactivate) | None => return true,
                Some(TransportCommand::Publish { destination, .. }) => {
                    warn!("Not connected, dropping publish to {}", destination);
                }
            },
        }
    }
}

/// Socket halves after a completed STOMP handshake and subscription
struct Established {
    writer: FrameWriter,
    reader: FrameReader,
    outgoing_ms: u64,
}

async fn handshake(config: &ChatConfig, credential: &Credential) -> Result<Established> {
    let url = handshake_url(config, credential)?;
    info!("Connecting to broker at {}", redacted(&url));

    let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::Handshake(format!("WebSocket connect failed: {}", e)))?;

    let (sink, stream) = socket.split();
    let mut writer = FrameWriter {
        sink,
        framing: config.framing,
    };
    let mut reader = FrameReader {
        stream,
        framing: config.framing,
        decoder: FrameDecoder::new(),
    };

    if config.framing == TransportFraming::SockJs {
        reader.wait_open().await?;
    }

    let host = url.host_str().unwrap_or("localhost").to_string();
    writer
        .send_frame(&Frame::connect(
            &host,
            config.heartbeat_outgoing_ms,
            config.heartbeat_incoming_ms,
        ))
        .await?;

    let connected = reader.wait_connected().await?;
    let (outgoing_ms, _incoming_ms) = stomp::negotiate_heartbeat(
        config.heartbeat_outgoing_ms,
        config.heartbeat_incoming_ms,
        connected.get("heart-beat"),
    );
    debug!(
        "STOMP session established (version {:?}, outgoing heart-beat {}ms)",
        connected.get("version"),
        outgoing_ms
    );

    writer
        .send_frame(&Frame::subscribe(SUBSCRIPTION_ID, &config.topic))
        .await?;
    info!("Subscribed to {}", config.topic);

    Ok(Established {
        writer,
        reader,
        outgoing_ms,
    })
}

async fn connect_once(
    config: &ChatConfig,
    credential: &Credential,
    peer: &mut TransportPeer,
) -> Result<Stop> {
    // Dropping the pending handshake closes its socket.
    let pending = handshake(config, credential);
    tokio::pin!(pending);

    let Established {
        mut writer,
        mut reader,
        outgoing_ms,
    } = loop {
        tokio::select! {
            established = &mut pending => break established?,
            command = peer.commands.recv() => match command {
                Some(TransportCommand::Deactivate) => {
                    info!("Deactivated during handshake");
                    return Ok(Stop::Deactivated);
                }
                None => return Ok(Stop::OwnerGone),
                Some(TransportCommand::Publish { destination, .. }) => {
                    warn!("Not connected, dropping publish to {}", destination);
                }
            },
        }
    };

    if peer.events.send(TransportEvent::Connected).is_err() {
        writer.shutdown().await;
        return Ok(Stop::OwnerGone);
    }

    let mut heartbeat = (outgoing_ms > 0).then(|| {
        let period = Duration::from_millis(outgoing_ms);
        tokio::time::interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            frames = reader.next_frames() => {
                let Some(frames) = frames? else {
                    return Err(Error::Transport("Broker closed the connection".to_string()));
                };
                for frame in frames {
                    match frame.command {
                        Command::Message => {
                            if frame.get("subscription").is_some_and(|s| s != SUBSCRIPTION_ID) {
                                debug!("Ignoring message for foreign subscription");
                                continue;
                            }
                            if peer.events.send(TransportEvent::Message(frame.body)).is_err() {
                                return Ok(Stop::OwnerGone);
                            }
                        }
                        Command::Error => {
                            let reason = frame.error_reason();
                            error!("Broker sent ERROR frame: {}", reason);
                            return Err(Error::Protocol(reason));
                        }
                        Command::Receipt => {
                            debug!("Receipt {:?}", frame.get("receipt-id"));
                        }
                        other => {
                            debug!("Ignoring unexpected {} frame", other);
                        }
                    }
                }
            }
            command = peer.commands.recv() => match command {
                Some(TransportCommand::Publish { destination, body }) => {
                    debug!("Publishing {} bytes to {}", body.len(), destination);
                    writer.send_frame(&Frame::send_json(&destination, body)).await?;
                }
                Some(TransportCommand::Deactivate) => {
                    writer.shutdown().await;
                    return Ok(Stop::Deactivated);
                }
                None => {
                    writer.shutdown().await;
                    return Ok(Stop::OwnerGone);
                }
            },
            _ = next_tick(&mut heartbeat) => {
                writer.send_heartbeat().await?;
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Broker URL with the credential attached as a query parameter
pub fn handshake_url(config: &ChatConfig, credential: &Credential) -> Result<Url> {
    let mut url = match config.framing {
        TransportFraming::SockJs => sockjs::websocket_url(&config.broker_url())?,
        TransportFraming::WebSocket => {
            let mut url = Url::parse(&config.broker_url()).map_err(|e| {
                Error::Transport(format!("Invalid broker endpoint {}: {}", config.broker_url(), e))
            })?;
            sockjs::to_websocket_scheme(&mut url)?;
            url
        }
    };

    url.query_pairs_mut()
        .append_pair(&config.token_query_param, credential.expose());
    Ok(url)
}

/// URL without its query string, safe to log
pub fn redacted(url: &Url) -> String {
    let mut safe = url.clone();
    safe.set_query(None);
    safe.to_string()
}

struct FrameWriter {
    sink: SplitSink<Socket, WsMessage>,
    framing: TransportFraming,
}

impl FrameWriter {
    async fn send_raw(&mut self, data: &str) -> Result<()> {
        let text = match self.framing {
            TransportFraming::SockJs => sockjs::encode(data)?,
            TransportFraming::WebSocket => data.to_string(),
        };
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::Transport(format!("WebSocket send failed: {}", e)))
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send_raw(&frame.encode()).await
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.send_raw("\n").await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.send_frame(&Frame::disconnect()).await {
            debug!("DISCONNECT not sent: {}", e);
        }
        if let Err(e) = self.sink.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    }
}

struct FrameReader {
    stream: SplitStream<Socket>,
    framing: TransportFraming,
    decoder: FrameDecoder,
}

impl FrameReader {
    /// Next batch of complete frames; `None` once the socket is closed.
    async fn next_frames(&mut self) -> Result<Option<Vec<Frame>>> {
        let message = match self.stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                return Err(Error::Transport(format!("WebSocket receive failed: {}", e)));
            }
            None => return Ok(None),
        };

        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|e| Error::Protocol(format!("Binary frame is not UTF-8: {}", e)))?,
            WsMessage::Close(_) => return Ok(None),
            _ => return Ok(Some(Vec::new())),
        };

        match self.framing {
            TransportFraming::WebSocket => self.decoder.push(&text).map(Some),
            TransportFraming::SockJs => match sockjs::decode(&text)? {
                SockJsFrame::Open | SockJsFrame::Heartbeat => Ok(Some(Vec::new())),
                SockJsFrame::Messages(payloads) => {
                    let mut frames = Vec::new();
                    for payload in payloads {
                        frames.extend(self.decoder.push(&payload)?);
                    }
                    Ok(Some(frames))
                }
                SockJsFrame::Close { code, reason } => Err(Error::Transport(format!(
                    "SockJS session closed ({}): {}",
                    code, reason
                ))),
            },
        }
    }

    async fn wait_open(&mut self) -> Result<()> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(Error::Handshake(format!("WebSocket receive failed: {}", e)));
                }
                None => {
                    return Err(Error::Handshake("Connection closed before SockJS open".to_string()));
                }
            };

            if let WsMessage::Text(text) = message {
                match sockjs::decode(&text)? {
                    SockJsFrame::Open => return Ok(()),
                    SockJsFrame::Close { code, reason } => {
                        return Err(Error::Handshake(format!(
                            "SockJS session refused ({}): {}",
                            code, reason
                        )));
                    }
                    other => debug!("Ignoring {:?} before SockJS open", other),
                }
            }
        }
    }

    async fn wait_connected(&mut self) -> Result<Frame> {
        loop {
            let frames = match self.next_frames().await {
                Ok(Some(frames)) => frames,
                Ok(None) => {
                    return Err(Error::Handshake("Connection closed during STOMP handshake".to_string()));
                }
                Err(Error::Transport(reason)) => return Err(Error::Handshake(reason)),
                Err(e) => return Err(e),
            };

            for frame in frames {
                match frame.command {
                    Command::Connected => return Ok(frame),
                    Command::Error => return Err(Error::Handshake(frame.error_reason())),
                    other => debug!("Ignoring {} frame before CONNECTED", other),
                }
            }
        }
    }
}
