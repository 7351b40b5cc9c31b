//! SockJS WebSocket-transport framing
//!
//! The marketplace broker endpoint is a SockJS endpoint. Over its raw
//! WebSocket transport every server message is prefixed with a one-letter
//! frame type and client payloads are JSON arrays of strings.

use crate::{Error, Result};
use rand::{Rng, distributions::Alphanumeric};
use url::Url;

/// Decoded server-side SockJS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    /// `o`: session opened
    Open,
    /// `h`: server heart-beat
    Heartbeat,
    /// `a[...]` or `m"..."`: application payloads in order
    Messages(Vec<String>),
    /// `c[code,"reason"]`: server closed the session
    Close {
        /// SockJS close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Decode one WebSocket text message from a SockJS server
pub fn decode(text: &str) -> Result<SockJsFrame> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Protocol("Empty SockJS frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => {
            let payloads: Vec<String> = serde_json::from_str(rest)
                .map_err(|e| Error::Protocol(format!("Invalid SockJS array frame: {}", e)))?;
            Ok(SockJsFrame::Messages(payloads))
        }
        'm' => {
            let payload: String = serde_json::from_str(rest)
                .map_err(|e| Error::Protocol(format!("Invalid SockJS message frame: {}", e)))?;
            Ok(SockJsFrame::Messages(vec![payload]))
        }
        'c' => {
            let (code, reason): (u16, String) = serde_json::from_str(rest)
                .map_err(|e| Error::Protocol(format!("Invalid SockJS close frame: {}", e)))?;
            Ok(SockJsFrame::Close { code, reason })
        }
        other => Err(Error::Protocol(format!("Unknown SockJS frame type: {}", other))),
    }
}

/// Wrap a client payload for the server
pub fn encode(payload: &str) -> Result<String> {
    serde_json::to_string(&[payload]).map_err(Error::JsonSerialization)
}

/// Switch an http(s) URL to the matching ws(s) scheme
pub fn to_websocket_scheme(url: &mut Url) -> Result<()> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Transport(format!("Unsupported broker scheme: {}", other)));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Transport(format!("Cannot switch {} to {}", url, scheme)))
}

/// Build the SockJS WebSocket URL `{endpoint}/{server-id}/{session-id}/websocket`
pub fn websocket_url(endpoint: &str) -> Result<Url> {
    let mut rng = rand::thread_rng();
    let server_id = format!("{:03}", rng.gen_range(0..1000));
    let session_id: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    let base = endpoint.trim_end_matches('/');
    let mut url = Url::parse(&format!("{}/{}/{}/websocket", base, server_id, session_id))
        .map_err(|e| Error::Transport(format!("Invalid broker endpoint {}: {}", endpoint, e)))?;
    to_websocket_scheme(&mut url)?;
    Ok(url)
}
