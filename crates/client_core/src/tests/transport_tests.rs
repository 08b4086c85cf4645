use super::*;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use shared::{
    protocol::{AiResponsePayload, ConnectedPayload},
    socketio::Handshake,
};
use tokio::{net::TcpListener, sync::broadcast::error::TryRecvError, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct ServerState {
    accepted: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
    refuse_join: bool,
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    state.accepted.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| companion_session(socket, state))
}

async fn send(socket: &mut WebSocket, packet: &Packet) -> bool {
    socket
        .send(WsMessage::Text(packet.encode().expect("encode")))
        .await
        .is_ok()
}

/// Plays the backend side: engine handshake, namespace ack, greeting and a
/// ping, then answers each `send_message` and hangs up on "bye".
async fn companion_session(mut socket: WebSocket, state: ServerState) {
    let handshake = Handshake {
        sid: "engine-1".into(),
        upgrades: Vec::new(),
        ping_interval: 25_000,
        ping_timeout: 20_000,
        max_payload: Some(1_000_000),
    };
    if !send(&mut socket, &Packet::Open(handshake)).await {
        return;
    }

    match socket.recv().await {
        Some(Ok(WsMessage::Text(text)))
            if Packet::decode(&text).ok() == Some(Packet::Connect(None)) => {}
        _ => return,
    }
    if state.refuse_join {
        let refusal = Packet::ConnectError(json!({"message": "Not authorized"}));
        let _ = send(&mut socket, &refusal).await;
        return;
    }

    let greeting = ServerEvent::Connected(ConnectedPayload {
        message: Some("Connected to AI Companion".into()),
        character: Some("Aiko".into()),
    })
    .to_packet()
    .expect("packet");
    for packet in [
        Packet::Connect(Some(json!({"sid": "socket-1"}))),
        greeting,
        Packet::Ping,
    ] {
        if !send(&mut socket, &packet).await {
            return;
        }
    }

    while let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        match Packet::decode(&text) {
            Ok(Packet::Pong) => {
                state.pongs.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Packet::Event { name, args }) if name == "send_message" => {
                let message = args
                    .first()
                    .and_then(|data| data["message"].as_str())
                    .unwrap_or_default()
                    .to_string();
                if message == "bye" {
                    let _ = socket.send(WsMessage::Close(None)).await;
                    return;
                }
                let reply = ServerEvent::AiResponse(AiResponsePayload {
                    message: format!("echo: {message}"),
                    emotion: Some("happy".into()),
                    intensity: Some(0.7),
                })
                .to_packet()
                .expect("packet");
                if !send(&mut socket, &reply).await {
                    return;
                }
            }
            _ => {
                let _ = socket.send(WsMessage::Text("42{not json".into())).await;
            }
        }
    }
}

async fn spawn_companion_server(refuse_join: bool) -> (String, ServerState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState {
        refuse_join,
        ..ServerState::default()
    };
    let app = Router::new()
        .route("/socket.io/", get(socket_handler))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_event(rx: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[test]
fn websocket_url_targets_socket_io_endpoint() {
    assert_eq!(
        websocket_url("http://127.0.0.1:5000").expect("url"),
        "ws://127.0.0.1:5000/socket.io/?EIO=4&transport=websocket"
    );
    assert_eq!(
        websocket_url("https://companion.local/app/?x=1#top").expect("url"),
        "wss://companion.local/app/socket.io/?EIO=4&transport=websocket"
    );
}

#[test]
fn websocket_url_rejects_other_schemes() {
    let err = websocket_url("ftp://companion.local").expect_err("ftp");
    assert!(matches!(err, TransportError::InvalidUrl { .. }));
    assert!(websocket_url("not a url").is_err());
}

#[test]
fn emit_while_idle_is_not_connected() {
    let transport = WebSocketTransport::new("http://127.0.0.1:9").expect("transport");
    let err = transport
        .emit(&ClientCommand::GetServicesStatus)
        .expect_err("idle link");
    assert!(matches!(err, TransportError::NotConnected));
    assert_eq!(transport.phase(), LinkPhase::Idle);
}

#[tokio::test]
async fn relays_commands_and_server_events() {
    let (server_url, _state) = spawn_companion_server(false).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert!(transport.is_connected());

    let TransportEvent::Server(ServerEvent::Connected(payload)) = next_event(&mut events).await
    else {
        panic!("expected connected confirmation");
    };
    assert_eq!(payload.character.as_deref(), Some("Aiko"));

    transport
        .emit(&ClientCommand::SendMessage {
            message: "hello".into(),
        })
        .expect("emit");
    let TransportEvent::Server(ServerEvent::AiResponse(reply)) = next_event(&mut events).await
    else {
        panic!("expected ai_response");
    };
    assert_eq!(reply.message, "echo: hello");
}

#[tokio::test]
async fn skips_malformed_frames() {
    let (server_url, _state) = spawn_companion_server(false).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    let _greeting = next_event(&mut events).await;

    transport
        .emit(&ClientCommand::GetServicesStatus)
        .expect("emit unexpected command");
    transport
        .emit(&ClientCommand::SendMessage {
            message: "still there?".into(),
        })
        .expect("emit");

    let TransportEvent::Server(ServerEvent::AiResponse(reply)) = next_event(&mut events).await
    else {
        panic!("malformed frame should have been skipped");
    };
    assert_eq!(reply.message, "echo: still there?");
}

#[tokio::test]
async fn reports_disconnect_and_can_reconnect() {
    let (server_url, state) = spawn_companion_server(false).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    let _greeting = next_event(&mut events).await;

    transport
        .emit(&ClientCommand::SendMessage {
            message: "bye".into(),
        })
        .expect("emit");
    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.emit(&ClientCommand::GetServicesStatus),
        Err(TransportError::NotConnected)
    ));

    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert_eq!(state.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_connect_opens_a_single_link() {
    let (server_url, state) = spawn_companion_server(false).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    transport.connect();
    let _greeting = next_event(&mut events).await;

    assert_eq!(state.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(transport.phase(), LinkPhase::Open);
}

#[tokio::test]
async fn answers_server_pings() {
    let (server_url, state) = spawn_companion_server(false).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    wait_until(|| state.pongs.load(Ordering::SeqCst) >= 1).await;
}

#[tokio::test]
async fn refused_namespace_join_never_reports_connected() {
    let (server_url, state) = spawn_companion_server(true).await;
    let transport = WebSocketTransport::new(&server_url).expect("transport");
    let mut events = transport.subscribe();

    transport.connect();
    wait_until(|| state.accepted.load(Ordering::SeqCst) == 1).await;
    wait_until(|| transport.phase() == LinkPhase::Idle).await;

    assert!(!transport.is_connected());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn failed_attempt_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = WebSocketTransport::new(&format!("http://{addr}")).expect("transport");
    transport.connect();

    wait_until(|| transport.phase() == LinkPhase::Idle).await;
    assert!(!transport.is_connected());
}
