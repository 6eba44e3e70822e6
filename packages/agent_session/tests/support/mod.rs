//! In-process stand-in for the agent backend: REST session routes under
//! `/api/v1` and the per-session WebSocket at `/ws/{id}`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_session::config::{FileConfig, ReconnectFileConfig, ServiceFileConfig};
use agent_session::{ChannelEvent, ClientConfig, EventTag, SessionChannelClient, Topic};
use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const TIMESTAMP: &str = "2024-05-01T10:00:00";
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct BackendState {
    pub sessions: HashMap<String, Vec<Value>>,
    /// `type` of every frame the server received, in order.
    pub frames_seen: Vec<String>,
    pub ws_connections: usize,
    /// Close this many upcoming WebSocket connections right after the welcome frame.
    pub drop_connections: usize,
}

#[derive(Clone, Default)]
pub struct Backend {
    pub state: Arc<Mutex<BackendState>>,
}

impl Backend {
    pub fn seed(&self, session_id: &str, contents: &[(&str, &str)]) {
        let messages = contents
            .iter()
            .map(|(kind, content)| message(kind, content))
            .collect();
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session_id.to_string(), messages);
    }

    pub fn frames_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().frames_seen.clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.state.lock().unwrap().ws_connections
    }

    pub fn drop_next_connections(&self, n: usize) {
        self.state.lock().unwrap().drop_connections = n;
    }
}

pub fn message(kind: &str, content: &str) -> Value {
    json!({
        "type": kind,
        "content": content,
        "timestamp": TIMESTAMP,
        "metadata": null,
        "agent_name": if kind == "assistant" { Value::from("code_agent") } else { Value::Null },
        "session_id": null,
    })
}

pub async fn spawn_backend(backend: Backend) -> SocketAddr {
    let api = Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/messages", get(get_messages).post(post_message))
        .route("/agents", get(agents))
        .route("/llm/providers", get(llm_providers))
        .route("/stats", get(stats));
    let app = Router::new()
        .nest("/api/v1", api)
        .route("/ws/{id}", get(ws_handler))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Client config pointing at `addr` with a short reconnect delay.
pub fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::from_file(&FileConfig {
        service: ServiceFileConfig {
            base_url: format!("http://{addr}"),
            ..Default::default()
        },
        reconnect: ReconnectFileConfig {
            max_attempts: 5,
            base_delay_ms: 50,
        },
        ..Default::default()
    })
}

/// Forward every event the client dispatches into a channel.
pub fn record_events(client: &SessionChannelClient) -> mpsc::UnboundedReceiver<ChannelEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on_message(Topic::Any, move |event: &ChannelEvent| {
        let _ = tx.send(event.clone());
    });
    rx
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one with `tag` arrives.
pub async fn wait_for(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>, tag: EventTag) -> ChannelEvent {
    loop {
        let event = next_event(rx).await;
        if event.tag() == tag {
            return event;
        }
    }
}

// ── REST ─────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "timestamp": TIMESTAMP, "version": "1.0.0"}))
}

async fn create_session(
    State(backend): State<Backend>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = backend.state.lock().unwrap();
    let session_id = match query.get("user_id") {
        Some(user) => format!("{user}-session-{}", state.sessions.len() + 1),
        None => format!("session-{}", state.sessions.len() + 1),
    };
    state.sessions.insert(session_id.clone(), Vec::new());
    Json(json!({"session_id": session_id, "created_at": TIMESTAMP, "status": "created"}))
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"detail": "Session not found"})),
    )
        .into_response()
}

async fn get_session(State(backend): State<Backend>, Path(id): Path<String>) -> Response {
    let state = backend.state.lock().unwrap();
    match state.sessions.get(&id) {
        Some(messages) => Json(json!({
            "session_id": id,
            "user_id": null,
            "created_at": TIMESTAMP,
            "last_activity": TIMESTAMP,
            "message_count": messages.len(),
            "workspace_path": null,
        }))
        .into_response(),
        None => not_found(),
    }
}

async fn get_messages(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let limit: usize = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(50);
    let state = backend.state.lock().unwrap();
    match state.sessions.get(&id) {
        Some(messages) => {
            let start = messages.len().saturating_sub(limit);
            Json(json!({
                "session_id": id,
                "messages": &messages[start..],
                "total_count": messages.len(),
            }))
            .into_response()
        }
        None => not_found(),
    }
}

async fn post_message(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let content = body["content"].as_str().unwrap_or_default().to_string();
    let mut state = backend.state.lock().unwrap();
    let Some(messages) = state.sessions.get_mut(&id) else {
        return not_found();
    };
    let sent = message("user", &content);
    let reply = message("assistant", &format!("echo: {content}"));
    messages.push(sent.clone());
    messages.push(reply.clone());
    Json(json!({"message_sent": sent, "responses": [reply], "session_id": id})).into_response()
}

async fn delete_session(State(backend): State<Backend>, Path(id): Path<String>) -> Json<Value> {
    backend.state.lock().unwrap().sessions.remove(&id);
    Json(json!({"status": "deleted", "session_id": id}))
}

async fn agents() -> Json<Value> {
    Json(json!({
        "agents": {"code_agent": {"status": "idle"}},
        "available_agents": ["code_agent", "file_agent", "terminal_agent"],
    }))
}

async fn llm_providers() -> Json<Value> {
    Json(json!({
        "providers": {"anthropic": {"model": "claude", "available": true}},
        "available": ["anthropic"],
    }))
}

async fn stats(State(backend): State<Backend>) -> Json<Value> {
    let state = backend.state.lock().unwrap();
    Json(json!({
        "session_count": state.sessions.len(),
        "active_sessions": state.ws_connections,
        "available_agents": 3,
        "available_llm_providers": 1,
        "timestamp": TIMESTAMP,
    }))
}

// ── WebSocket ────────────────────────────────────────────────────────────

async fn ws_handler(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, backend, id))
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    socket
        .send(WsFrame::Text(value.to_string().into()))
        .await
        .is_ok()
}

async fn serve_socket(mut socket: WebSocket, backend: Backend, session_id: String) {
    let drop_now = {
        let mut state = backend.state.lock().unwrap();
        state.ws_connections += 1;
        state.sessions.entry(session_id.clone()).or_default();
        if state.drop_connections > 0 {
            state.drop_connections -= 1;
            true
        } else {
            false
        }
    };

    send_json(
        &mut socket,
        json!({
            "type": "connection_established",
            "session_id": session_id,
            "timestamp": TIMESTAMP,
            "message": "welcome",
        }),
    )
    .await;
    if drop_now {
        let _ = socket.send(WsFrame::Close(None)).await;
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let WsFrame::Text(text) = frame else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            send_json(&mut socket, json!({"type": "error", "error": "Invalid JSON format"})).await;
            continue;
        };
        let kind = frame["type"].as_str().unwrap_or("message").to_string();
        backend.state.lock().unwrap().frames_seen.push(kind.clone());

        let replies = match kind.as_str() {
            "get_history" => {
                let state = backend.state.lock().unwrap();
                let messages = state.sessions.get(&session_id).cloned().unwrap_or_default();
                vec![json!({
                    "type": "message_history",
                    "messages": messages,
                    "total_count": messages.len(),
                })]
            }
            "ping" => vec![json!({"type": "pong"})],
            "message" => {
                let content = frame["content"].as_str().unwrap_or_default();
                let sent = message("user", content);
                let reply = message("assistant", &format!("echo: {content}"));
                let mut state = backend.state.lock().unwrap();
                let messages = state.sessions.entry(session_id.clone()).or_default();
                messages.push(sent.clone());
                messages.push(reply.clone());
                vec![
                    json!({"type": "message_received", "message": sent}),
                    json!({"type": "typing", "agent": "thinking..."}),
                    json!({"type": "typing_stop"}),
                    json!({"type": "message", "message": reply}),
                ]
            }
            other => vec![json!({"type": "error", "error": format!("Unknown message type: {other}")})],
        };

        for reply in replies {
            if !send_json(&mut socket, reply).await {
                return;
            }
        }
    }
}
