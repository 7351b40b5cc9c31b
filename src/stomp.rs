//! STOMP 1.2 frame codec
//!
//! This module handles the broker wire format:
//! - Frame model (command, ordered headers, body)
//! - Encoding with header escaping and `content-length`
//! - Incremental decoding of a text stream that may split or batch frames
//! - Heart-beat negotiation

use crate::{Error, Result};
use std::fmt;

/// Protocol version offered in `CONNECT`
pub const STOMP_VERSION: &str = "1.2";

/// STOMP frame commands used by the chat client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client → broker: open a session
    Connect,
    /// Broker → client: session opened
    Connected,
    /// Client → broker: publish
    Send,
    /// Client → broker: start a subscription
    Subscribe,
    /// Client → broker: stop a subscription
    Unsubscribe,
    /// Client → broker: close the session
    Disconnect,
    /// Broker → client: subscription delivery
    Message,
    /// Broker → client: receipt for a client frame
    Receipt,
    /// Broker → client: fatal error, the broker closes afterwards
    Error,
}

impl Command {
    /// Wire name of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Parse a wire command name
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "CONNECT" | "STOMP" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "DISCONNECT" => Ok(Command::Disconnect),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            other => Err(Error::Protocol(format!("Unknown STOMP command: {}", other))),
        }
    }

    /// `CONNECT` and `CONNECTED` headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: Command,
    /// Headers in wire order; the first occurrence of a name wins
    pub headers: Vec<(String, String)>,
    /// Frame body (UTF-8 text; the chat protocol only carries JSON)
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers or body
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame opening a session
    pub fn connect(host: &str, heartbeat_out_ms: u64, heartbeat_in_ms: u64) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat_out_ms, heartbeat_in_ms))
    }

    /// `SUBSCRIBE` frame for `destination`
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `SEND` frame carrying a JSON body
    pub fn send_json(destination: &str, body: impl Into<String>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    /// `DISCONNECT` frame
    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Human-readable reason carried by an `ERROR` frame
    pub fn error_reason(&self) -> String {
        match (self.get("message"), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{}: {}", message, body),
            (None, "") => "broker reported an error".to_string(),
            (None, body) => body.to_string(),
        }
    }

    /// Encode to wire text, NUL-terminated
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::Protocol(format!(
                    "Invalid header escape sequence: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Incremental decoder for a STOMP byte stream
///
/// Transport messages may carry a partial frame, several frames, or only
/// heart-beat newlines; feed them in order with [`FrameDecoder::push`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data and return every frame it completes
    pub fn push(&mut self, data: &str) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data.as_bytes());
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        // Heart-beats are bare EOLs between frames.
        let skip = self
            .buffer
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        self.buffer.drain(..skip);

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let Some((head_end, body_start)) = find_header_end(&self.buffer) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buffer[..head_end])
            .map_err(|e| Error::Protocol(format!("Frame head is not UTF-8: {}", e)))?;
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));

        let command = Command::parse(lines.next().unwrap_or_default())?;
        let mut headers = Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::Protocol(format!("Malformed header line: {}", line)));
            };
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::Protocol(format!("Invalid content-length: {}", v)))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                if self.buffer.len() < body_start + len + 1 {
                    return Ok(None);
                }
                if self.buffer[body_start + len] != 0 {
                    return Err(Error::Protocol(
                        "Frame body not terminated after content-length".to_string(),
                    ));
                }
                body_start + len
            }
            None => match self.buffer[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        let body = String::from_utf8(self.buffer[body_start..body_end].to_vec())
            .map_err(|e| Error::Protocol(format!("Frame body is not UTF-8: {}", e)))?;

        self.buffer.drain(..=body_end);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

/// Locate the blank line ending the frame head.
/// Returns (end of head, start of body).
fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            if buffer.get(i + 1) == Some(&b'\n') {
                return Some((i, i + 2));
            }
            if buffer.get(i + 1) == Some(&b'\r') && buffer.get(i + 2) == Some(&b'\n') {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }
    None
}

/// Negotiate heart-beat intervals from the client offer and the broker's
/// `heart-beat` header. Returns (client→broker ms, broker→client ms); 0 means off.
pub fn negotiate_heartbeat(client_out_ms: u64, client_in_ms: u64, server_header: Option<&str>) -> (u64, u64) {
    let (server_out, server_in) = server_header
        .and_then(|h| h.split_once(','))
        .and_then(|(a, b)| Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?)))
        .unwrap_or((0, 0));

    let outgoing = if client_out_ms == 0 || server_in == 0 {
        0
    } else {
        client_out_ms.max(server_in)
    };
    let incoming = if client_in_ms == 0 || server_out == 0 {
        0
    } else {
        client_in_ms.max(server_out)
    };
    (outgoing, incoming)
}
