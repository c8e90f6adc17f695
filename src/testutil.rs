//! Test helpers: scripted stdio children and in-process mock MCP servers.
//!
//! Stdio backends are exercised against real child processes driven by
//! small shell one-liners; HTTP and SSE backends against an axum server on
//! an ephemeral port.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::config::{BackendConfig, GatewayConfig};
use crate::registry::Registry;

/// A child that answers every request line with the same `tools/list`
/// result, tagged with the line number it replied to. The `seq` field makes
/// cache hits observable: a cached reply keeps the sequence number of the
/// handshake-time fetch, while a real round-trip would bump it.
pub const SEQ_TOOLS_COMMAND: &str = r#"awk '{printf("{\"jsonrpc\":\"2.0\",\"id\":%d,\"result\":{\"tools\":[{\"name\":\"ping\",\"description\":\"pong\"}],\"seq\":%d}}\n", NR-1, NR); fflush()}'"#;

/// A child that repeats a fixed `tools/list` result for every request.
pub fn static_tools_command(tools: &Value) -> String {
    let reply = json!({"jsonrpc": "2.0", "id": 0, "result": {"tools": tools}});
    format!("yes '{reply}'")
}

pub fn stdio_config(name: &str, command: &str) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        description: String::new(),
        command: Some(command.to_string()),
        http_url: None,
        env: HashMap::new(),
        headers: HashMap::new(),
        cwd: None,
        idle_timeout: 300.0,
        enabled: true,
    }
}

pub fn http_config(name: &str, url: &str) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        description: String::new(),
        command: None,
        http_url: Some(url.to_string()),
        env: HashMap::new(),
        headers: HashMap::new(),
        cwd: None,
        idle_timeout: 300.0,
        enabled: true,
    }
}

pub fn sse_config(name: &str, url: &str) -> BackendConfig {
    http_config(name, url)
}

/// Build a registry from named backend configs, preserving insertion order.
pub fn registry_with(backends: Vec<(&str, BackendConfig)>) -> Registry {
    let mut config = GatewayConfig::default();
    for (name, mut backend) in backends {
        backend.name = name.to_string();
        config.backends.insert(name.to_string(), backend);
    }
    Registry::from_config(&config)
}

/// Reply style of the mock MCP server.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MockServerKind {
    /// Plain JSON bodies.
    Json,
    /// Plain JSON bodies plus an `mcp-session-id` response header.
    JsonWithSession,
    /// Replies framed as single-event SSE streams.
    SseFramed,
}

#[derive(Clone)]
struct MockState {
    tools: Value,
    kind: MockServerKind,
    requests: Arc<Mutex<Vec<Value>>>,
    sessions: Arc<Mutex<Vec<Option<String>>>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockServer {
    pub fn mcp_url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn sse_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    /// Bodies received so far, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    /// The `mcp-session-id` header observed on each request.
    pub fn seen_sessions(&self) -> Vec<Option<String>> {
        self.state.sessions.lock().unwrap().clone()
    }
}

/// Spawn an in-process MCP server answering `initialize`, `tools/list` and
/// `tools/call`. Serves `/mcp` (streamable-http) and the `/sse` + `/message`
/// pair (endpoint-negotiated SSE).
pub async fn spawn_mock_server(tools: Value, kind: MockServerKind) -> MockServer {
    let state = MockState {
        tools,
        kind,
        requests: Arc::new(Mutex::new(Vec::new())),
        sessions: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/mcp", post(mock_mcp))
        .route("/message", post(mock_mcp))
        .route("/sse", get(mock_sse))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer { addr, state }
}

async fn mock_mcp(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(request.clone());
    state.sessions.lock().unwrap().push(
        headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    );

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let result = match request.get("method").and_then(Value::as_str).unwrap_or("") {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": {"name": "mock-backend", "version": "0.0"},
        }),
        "tools/list" => json!({"tools": state.tools}),
        "tools/call" => json!({
            "content": [{"type": "text", "text": "ok"}],
            "echo": request.get("params").cloned().unwrap_or(Value::Null),
        }),
        _ => Value::Null,
    };
    let reply = json!({"jsonrpc": "2.0", "result": result, "id": id});

    let mut builder = Response::builder().status(StatusCode::OK);
    if state.kind == MockServerKind::JsonWithSession {
        builder = builder.header("mcp-session-id", "sess-123");
    }
    match state.kind {
        MockServerKind::SseFramed => builder
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from(format!("event: message\ndata: {reply}\n\n")))
            .unwrap(),
        _ => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(reply.to_string()))
            .unwrap(),
    }
}

async fn mock_sse() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(
            "event: endpoint\ndata: /message?sessionId=abc123\n\n",
        ))
        .unwrap()
}
