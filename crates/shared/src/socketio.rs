//! Engine.IO v4 / Socket.IO v5 text packets, default namespace only.
//!
//! A frame is one engine digit followed by its body. Engine `4` (message)
//! carries a socket digit, so `42["ai_response",{...}]` is an event and `40`
//! joins the namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Endpoint the backend serves the socket on, relative to its base url.
pub const ENGINE_IO_PATH: &str = "/socket.io/";
pub const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Body of the engine `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Handshake {
    /// How long the link may stay silent before the server counts as gone.
    pub fn silence_limit(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace join. The client sends it bare, the server acks with `{"sid":..}`.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            name: name.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let text = match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(auth)) => format!("40{}", serde_json::to_string(auth)?),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, args } => {
                let mut frame = Vec::with_capacity(args.len() + 1);
                frame.push(Value::String(name.clone()));
                frame.extend(args.iter().cloned());
                format!("42{}", serde_json::to_string(&frame)?)
            }
            Self::ConnectError(data) => format!("44{}", serde_json::to_string(data)?),
        };
        Ok(text)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ProtocolError::InvalidPacket(text.to_string()))?;
        let body = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            // A ping may carry a "probe" body; it is answered the same way.
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '6' => Ok(Self::Noop),
            '4' => decode_message(text, body),
            _ => Err(ProtocolError::InvalidPacket(text.to_string())),
        }
    }
}

fn decode_message(text: &str, body: &str) -> Result<Packet, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ProtocolError::InvalidPacket(text.to_string()))?;
    let body = strip_default_namespace(chars.as_str())?;
    match kind {
        '0' if body.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(serde_json::from_str(body)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            // Acknowledgement ids sit between the type digit and the array.
            let body = body.trim_start_matches(|ch: char| ch.is_ascii_digit());
            let mut args: Vec<Value> = serde_json::from_str(body)?;
            if args.is_empty() {
                return Err(ProtocolError::InvalidPacket(text.to_string()));
            }
            let Value::String(name) = args.remove(0) else {
                return Err(ProtocolError::InvalidPacket(text.to_string()));
            };
            Ok(Packet::Event { name, args })
        }
        '4' => Ok(Packet::ConnectError(serde_json::from_str(body)?)),
        other => Err(ProtocolError::UnsupportedPacket(format!("4{other}"))),
    }
}

fn strip_default_namespace(body: &str) -> Result<&str, ProtocolError> {
    let Some(rest) = body.strip_prefix('/') else {
        return Ok(body);
    };
    let (namespace, rest) = rest.split_once(',').unwrap_or((rest, ""));
    if namespace.is_empty() {
        Ok(rest)
    } else {
        Err(ProtocolError::ForeignNamespace(format!("/{namespace}")))
    }
}

#[cfg(test)]
#[path = "tests/socketio_tests.rs"]
mod tests;
