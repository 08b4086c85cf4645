//! Persistent event channel to the companion backend.
//!
//! The backend speaks Socket.IO over a websocket. A link counts as connected
//! once the server acknowledges the namespace join, not when the socket opens.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use shared::{
    protocol::{ClientCommand, ServerEvent},
    socketio::{Packet, ENGINE_IO_PATH, ENGINE_IO_QUERY},
};
use tokio::{
    sync::{broadcast, mpsc},
    time::{timeout, Duration},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;

const EVENT_BUFFER: usize = 256;
/// Upper bound for the engine handshake and namespace join.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

pub trait Transport: Send + Sync {
    /// Starts a connection attempt unless one is open or in progress.
    fn connect(&self);
    fn is_connected(&self) -> bool;
    /// Hands a command to the open link. Nothing is queued while disconnected.
    fn emit(&self, command: &ClientCommand) -> Result<(), TransportError>;
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Maps the backend's `http(s)://` base url to its Socket.IO websocket endpoint.
pub fn websocket_url(server_url: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: server_url.to_string(),
        reason,
    };
    let mut url = Url::parse(server_url.trim()).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to `{scheme}`")))?;
    let path = format!("{}{ENGINE_IO_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some(ENGINE_IO_QUERY));
    url.set_fragment(None);
    Ok(url.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Connecting,
    Open,
}

enum LinkState {
    Idle,
    Connecting,
    Open { outbound: mpsc::UnboundedSender<String> },
}

impl LinkState {
    fn phase(&self) -> LinkPhase {
        match self {
            Self::Idle => LinkPhase::Idle,
            Self::Connecting => LinkPhase::Connecting,
            Self::Open { .. } => LinkPhase::Open,
        }
    }
}

struct Link {
    ws_url: String,
    state: Mutex<LinkState>,
    events: broadcast::Sender<TransportEvent>,
}

pub struct WebSocketTransport {
    link: Arc<Link>,
}

impl WebSocketTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        let ws_url = websocket_url(server_url)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            link: Arc::new(Link {
                ws_url,
                state: Mutex::new(LinkState::Idle),
                events,
            }),
        })
    }

    pub fn phase(&self) -> LinkPhase {
        self.link.state().phase()
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) {
        {
            let mut state = self.link.state();
            if !matches!(*state, LinkState::Idle) {
                debug!(phase = ?state.phase(), "connect requested while link is busy");
                return;
            }
            *state = LinkState::Connecting;
        }
        let link = Arc::clone(&self.link);
        tokio::spawn(async move { link.run().await });
    }

    fn is_connected(&self) -> bool {
        matches!(self.phase(), LinkPhase::Open)
    }

    fn emit(&self, command: &ClientCommand) -> Result<(), TransportError> {
        let frame = command.encode().map_err(|source| TransportError::Encode {
            command: command.name(),
            source,
        })?;
        let state = self.link.state();
        let LinkState::Open { outbound } = &*state else {
            return Err(TransportError::NotConnected);
        };
        outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)?;
        debug!(command = command.name(), "queued outbound command");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.link.events.subscribe()
    }
}

impl Link {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: TransportEvent) {
        // No subscribers just means nobody is listening yet.
        let _ = self.events.send(event);
    }

    async fn run(&self) {
        let ws_stream = match timeout(HANDSHAKE_TIMEOUT, connect_async(self.ws_url.as_str())).await
        {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(err)) => {
                warn!(url = %self.ws_url, error = %err, "failed to connect websocket");
                *self.state() = LinkState::Idle;
                return;
            }
            Err(_) => {
                warn!(url = %self.ws_url, "websocket connect timed out");
                *self.state() = LinkState::Idle;
                return;
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(Message::Text(frame)).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
            }
        });

        // The handshake timeout applies until the namespace join is acked.
        let mut silence_limit = HANDSHAKE_TIMEOUT;
        let mut heartbeat_limit = HANDSHAKE_TIMEOUT;
        let mut joined = false;
        loop {
            let msg = match timeout(silence_limit, ws_reader.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(err))) => {
                    warn!(error = %err, "websocket receive failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(joined, "no traffic from server, dropping link");
                    break;
                }
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let packet = match Packet::decode(&text) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(error = %err, "skipping server frame");
                    continue;
                }
            };
            match packet {
                Packet::Open(handshake) => {
                    debug!(sid = %handshake.sid, "engine handshake received");
                    if joined {
                        continue;
                    }
                    heartbeat_limit = handshake.silence_limit();
                    if !send_packet(&outbound, &Packet::Connect(None)) {
                        break;
                    }
                }
                Packet::Connect(_) if !joined => {
                    joined = true;
                    silence_limit = heartbeat_limit;
                    *self.state() = LinkState::Open {
                        outbound: outbound.clone(),
                    };
                    info!(url = %self.ws_url, "socket connected");
                    self.publish(TransportEvent::Connected);
                }
                Packet::Connect(_) | Packet::Pong | Packet::Noop => {}
                Packet::Ping => {
                    if !send_packet(&outbound, &Packet::Pong) {
                        break;
                    }
                }
                Packet::Event { name, args } => match ServerEvent::from_event(&name, args) {
                    Ok(event) => {
                        debug!(event = event.name(), "received server event");
                        self.publish(TransportEvent::Server(event));
                    }
                    Err(err) => warn!(event = %name, error = %err, "skipping server event"),
                },
                Packet::ConnectError(reason) => {
                    warn!(%reason, "server refused namespace join");
                    break;
                }
                Packet::Disconnect | Packet::Close => break,
            }
        }

        writer.abort();
        *self.state() = LinkState::Idle;
        if joined {
            info!(url = %self.ws_url, "socket disconnected");
            self.publish(TransportEvent::Disconnected);
        }
    }
}

fn send_packet(outbound: &mpsc::UnboundedSender<String>, packet: &Packet) -> bool {
    match packet.encode() {
        Ok(frame) => outbound.send(frame).is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode control packet");
            false
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
