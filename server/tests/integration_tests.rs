//! Integration tests for Callwire Server
//!
//! Each test starts the real router on an ephemeral port backed by an
//! in-memory database.

use std::net::SocketAddr;
use std::time::Duration;

use callwire_server::{build_router, config::Config, storage::IN_MEMORY, AppState};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::header::AUTHORIZATION, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.storage.database_path = IN_MEMORY.to_string();
        let state = AppState::new(config).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn user(&self, id: &str, name: &str) -> String {
        self.state.storage.create_user(id, Some(name), None).await.unwrap();
        let (token, _) = self.state.storage.create_session(id, 1).await.unwrap();
        token
    }

    async fn connect(&self, token: &str) -> Socket {
        let mut request = format!("ws://{}/ws", self.addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        let (socket, _) = connect_async(request).await.unwrap();
        socket
    }

    /// Waits until `identity` has `count` live connections.
    async fn wait_online(&self, identity: &str, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.state.presence.connection_count(identity) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn recv_nothing(socket: &mut Socket) {
    let result = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await;

    let body: Value = Client::new()
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_websocket_rejects_unauthenticated() {
    let server = TestServer::start().await;

    let result = connect_async(format!("ws://{}/ws", server.addr)).await;
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
    }

    let result = connect_async(format!("ws://{}/ws?token=bogus", server.addr)).await;
    assert!(matches!(result, Err(WsError::Http(r)) if r.status() == 401));
}

#[tokio::test]
async fn test_query_token_is_accepted() {
    let server = TestServer::start().await;
    let token = server.user("alice", "Alice").await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws?token={}", server.addr, token))
        .await
        .unwrap();
    server.wait_online("alice", 1).await;

    send(&mut socket, json!({ "type": "ping" })).await;
    assert_eq!(recv(&mut socket).await, json!({ "type": "pong" }));
}

#[tokio::test]
async fn test_signal_is_stamped_with_sender() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;

    let mut alice = server.connect(&alice_token).await;
    let mut bob = server.connect(&bob_token).await;
    server.wait_online("bob", 1).await;

    send(
        &mut alice,
        json!({
            "type": "call:offer",
            "payload": {
                "callId": "c1",
                "to": "bob",
                "from": { "id": "mallory" },
                "medium": "audio",
                "offer": { "type": "offer", "sdp": "v=0" }
            }
        }),
    )
    .await;

    let frame = recv(&mut bob).await;
    assert_eq!(frame["type"], "call:offer");
    assert_eq!(frame["payload"]["callId"], "c1");
    assert_eq!(frame["payload"]["from"]["id"], "alice");
    assert_eq!(frame["payload"]["from"]["name"], "Alice");
    assert_eq!(frame["payload"]["offer"]["sdp"], "v=0");

    // Nothing echoes back to the sender
    recv_nothing(&mut alice).await;
}

#[tokio::test]
async fn test_malformed_signals_are_dropped_silently() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;

    let mut alice = server.connect(&alice_token).await;
    let mut bob = server.connect(&bob_token).await;
    server.wait_online("bob", 1).await;

    send(&mut alice, json!({ "type": "call:hangup", "payload": { "callId": "c1" } })).await;
    send(&mut alice, json!({ "type": "call:hangup", "payload": { "to": "bob" } })).await;

    recv_nothing(&mut bob).await;
    recv_nothing(&mut alice).await;
}

#[tokio::test]
async fn test_mistyped_signal_fields_are_dropped_silently() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;

    let mut alice = server.connect(&alice_token).await;
    let mut bob = server.connect(&bob_token).await;
    server.wait_online("bob", 1).await;

    send(&mut alice, json!({ "type": "call:offer", "payload": { "callId": "c1", "to": 123 } })).await;
    send(&mut alice, json!({ "type": "call:ice", "payload": "garbage" })).await;

    recv_nothing(&mut alice).await;
    recv_nothing(&mut bob).await;
}

#[tokio::test]
async fn test_undecodable_frame_gets_error_reply() {
    let server = TestServer::start().await;
    let token = server.user("alice", "Alice").await;
    let mut socket = server.connect(&token).await;

    socket.send(Message::Text("not json".into())).await.unwrap();

    let frame = recv(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["payload"]["code"], "PARSE_ERROR");
}

#[tokio::test]
async fn test_signal_fans_out_to_every_connection() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;

    let mut alice = server.connect(&alice_token).await;
    let mut bob_phone = server.connect(&bob_token).await;
    let mut bob_laptop = server.connect(&bob_token).await;
    server.wait_online("bob", 2).await;

    send(&mut alice, json!({ "type": "call:busy", "payload": { "callId": "c9", "to": "bob" } })).await;

    for socket in [&mut bob_phone, &mut bob_laptop] {
        let frame = recv(socket).await;
        assert_eq!(frame["type"], "call:busy");
        assert_eq!(frame["payload"]["from"]["id"], "alice");
    }

    drop(bob_laptop);
    server.wait_online("bob", 1).await;
    assert!(server.state.presence.is_online("bob"));
}

#[tokio::test]
async fn test_notifications_are_delivered_until_acknowledged() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;
    let client = Client::new();

    // Bob is offline; the notification waits in storage
    let created: Value = client
        .post(server.url("/api/v1/notifications"))
        .bearer_auth(&alice_token)
        .json(&json!({ "recipient": "bob", "message": "Missed call", "type": "missed_call" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["sender"], "alice");

    let mut bob = server.connect(&bob_token).await;
    let frame = recv(&mut bob).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["payload"]["id"], id.as_str());
    assert_eq!(frame["payload"]["type"], "missed_call");
    drop(bob);
    server.wait_online("bob", 0).await;

    // Unacknowledged, so it is re-sent on the next connection
    let mut bob = server.connect(&bob_token).await;
    assert_eq!(recv(&mut bob).await["payload"]["id"], id.as_str());

    send(&mut bob, json!({ "type": "notification:ack", "payload": { "ids": [id] } })).await;
    send(&mut bob, json!({ "type": "ping" })).await;
    assert_eq!(recv(&mut bob).await["type"], "pong");
    drop(bob);
    server.wait_online("bob", 0).await;

    let mut bob = server.connect(&bob_token).await;
    recv_nothing(&mut bob).await;

    let pending: Value = client
        .get(server.url("/api/v1/notifications"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["notifications"], json!([]));
}

#[tokio::test]
async fn test_notification_racing_connect_arrives_once() {
    use callwire_server::models::{CreateNotificationRequest, NotificationView, ServerControl, WsServerMessage};

    let server = TestServer::start().await;
    let bob_token = server.user("bob", "Bob").await;

    let request: CreateNotificationRequest =
        serde_json::from_value(json!({ "recipient": "bob", "message": "Missed call" })).unwrap();
    let record = server
        .state
        .storage
        .store_notification("bob", "alice", &request, 24)
        .await
        .unwrap();
    let id = record.id.clone();

    let mut bob = server.connect(&bob_token).await;
    server.wait_online("bob", 1).await;
    // The same record also goes out live, as if created during the backlog load
    server.state.presence.publish(
        "bob",
        WsServerMessage::Control(ServerControl::Notification(NotificationView::from(record))),
    );

    assert_eq!(recv(&mut bob).await["payload"]["id"], id.as_str());
    recv_nothing(&mut bob).await;
}

#[tokio::test]
async fn test_online_recipient_gets_notification_pushed() {
    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;

    let mut bob = server.connect(&bob_token).await;
    server.wait_online("bob", 1).await;

    let status = Client::new()
        .post(server.url("/api/v1/notifications"))
        .bearer_auth(&alice_token)
        .json(&json!({ "recipient": "bob", "message": "hello" }))
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success());

    let frame = recv(&mut bob).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["payload"]["message"], "hello");
    assert_eq!(frame["payload"]["type"], "general");
}

#[tokio::test]
async fn test_turn_disabled_returns_empty_list() {
    let server = TestServer::start().await;
    let token = server.user("alice", "Alice").await;

    let body: Value = Client::new()
        .get(server.url("/api/v1/turn/credentials"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["urls"], json!([]));
}

#[tokio::test]
async fn test_core_client_signals_round_trip() {
    use callwire_core::{
        CallId, ClientConfig, IceCandidate, Identity, ServerEvent, Signal, SignalingChannel, WebSocketClient,
    };

    let server = TestServer::start().await;
    let alice_token = server.user("alice", "Alice").await;
    let bob_token = server.user("bob", "Bob").await;
    let config = ClientConfig::new("127.0.0.1", server.addr.port(), false);

    let (alice, _alice_events) = WebSocketClient::connect(&config, &alice_token).await.unwrap();
    let (_bob, mut bob_events) = WebSocketClient::connect(&config, &bob_token).await.unwrap();
    server.wait_online("bob", 1).await;

    let call_id = CallId::from("call-42");
    alice
        .send(Signal::ice(call_id.clone(), IceCandidate::new("candidate:1"), Identity::from("bob")))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, bob_events.recv()).await.unwrap().unwrap();
    let ServerEvent::Signal(signal) = event else {
        panic!("expected a signal, got {:?}", event);
    };
    assert_eq!(signal.kind(), "call:ice");
    assert_eq!(signal.call_id(), &call_id);
    let from = signal.route().from.clone().unwrap();
    assert_eq!(from.id, Identity::from("alice"));
    assert_eq!(from.name.as_deref(), Some("Alice"));
}
