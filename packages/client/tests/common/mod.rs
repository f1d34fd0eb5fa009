//! In-process fake messaging server for integration tests.
//!
//! Serves the WebSocket channel at `/socket` and the REST endpoints the
//! client reads, accepting only `Bearer good-token`.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use kizuna_client::{
    config::ClientConfig,
    credential::{MemoryStore, TokenResolver},
    domain::{UserId, UserProfile},
};

pub const GOOD_TOKEN: &str = "good-token";

/// One accepted WebSocket, seen from the server side
pub struct ServerSocket {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl ServerSocket {
    /// Push a raw frame to the client.
    pub fn push(&self, frame: Value) {
        let _ = self.outbound.send(frame.to_string());
    }

    /// Next frame the client sent, or `None` after 5 seconds.
    pub async fn next_frame(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame with the given `event` name, skipping others.
    pub async fn next_event(&mut self, name: &str) -> Option<Value> {
        while let Some(frame) = self.next_frame().await {
            if frame["event"] == name {
                return Some(frame);
            }
        }
        None
    }

    /// Close the socket from the server side.
    pub fn close(self) {}
}

/// Request seen by a REST endpoint
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

struct FakeState {
    sockets: mpsc::UnboundedSender<ServerSocket>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeState {
    fn record(&self, path: String, headers: &HeaderMap) -> bool {
        let value = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let authorization = value(header::AUTHORIZATION);
        let authorized = authorization.as_deref() == Some(format!("Bearer {}", GOOD_TOKEN).as_str());
        self.requests.lock().unwrap().push(RecordedRequest {
            path,
            authorization,
            cookie: value(header::COOKIE),
        });
        authorized
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    pub sockets: mpsc::UnboundedReceiver<ServerSocket>,
    state: Arc<FakeState>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let (sockets_tx, sockets) = mpsc::unbounded_channel();
        let state = Arc::new(FakeState {
            sockets: sockets_tx,
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/socket", get(socket_handler))
            .route("/user/profile/{id}", get(profile_handler))
            .route("/user/connections", get(connections_handler))
            .route("/chat/send", post(send_handler))
            .route("/chat/{id}", get(history_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            sockets,
            state,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(
            format!("ws://{}/socket", self.addr),
            format!("http://{}/", self.addr),
        )
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Next accepted socket, or `None` after 5 seconds.
    pub async fn accept(&mut self) -> Option<ServerSocket> {
        tokio::time::timeout(Duration::from_secs(5), self.sockets.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Resolver whose local storage holds `token`.
pub fn resolver(token: &str) -> Arc<TokenResolver> {
    Arc::new(TokenResolver::standard(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new().with("token", token)),
        Arc::new(MemoryStore::new()),
    ))
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn alice() -> UserProfile {
    UserProfile::new(user("alice"), "Alice", "Jones")
}

/// Poll `condition` until it holds, panicking after 5 seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn message_json(id: &str, from: &str, to: &str, content: &str) -> Value {
    json!({
        "_id": id,
        "senderId": from,
        "receiverId": { "_id": to, "firstName": "Someone" },
        "content": content,
        "timestamp": "2024-05-01T10:00:00Z",
    })
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<FakeState>>,
) -> Response {
    if !state.record("/socket".to_string(), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<FakeState>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let server_socket = ServerSocket {
        outbound: outbound_tx,
        inbound: inbound_rx,
    };
    if state.sockets.send(server_socket).is_err() {
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        let _ = inbound_tx.send(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn profile_handler(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<FakeState>>,
) -> Response {
    if !state.record(format!("/user/profile/{}", id), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match id.as_str() {
        "bob" => envelope(json!({ "_id": "bob", "firstName": "Bob", "lastName": "Smith" }))
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn connections_handler(headers: HeaderMap, State(state): State<Arc<FakeState>>) -> Response {
    if !state.record("/user/connections".to_string(), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    envelope(json!([
        { "_id": "bob", "firstName": "Bob", "lastName": "Smith" },
        { "firstName": "No", "lastName": "Id" },
        { "_id": "carol", "firstName": "Carol" },
    ]))
    .into_response()
}

async fn history_handler(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<FakeState>>,
) -> Response {
    if !state.record(format!("/chat/{}", id), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    envelope(json!([message_json("h1", &id, "alice", "earlier")]))
    .into_response()
}

async fn send_handler(
    headers: HeaderMap,
    State(state): State<Arc<FakeState>>,
    Json(body): Json<Value>,
) -> Response {
    if !state.record("/chat/send".to_string(), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let target = body["targetUserId"].as_str().unwrap_or_default().to_string();
    let content = body["content"].as_str().unwrap_or_default().to_string();
    if content == "reject" {
        return Json(json!({ "success": false, "message": "rejected" })).into_response();
    }
    envelope(message_json("http-1", "alice", &target, &content)).into_response()
}
