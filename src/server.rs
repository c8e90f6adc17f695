use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::meta;
use crate::protocol;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub enable_meta_mcp: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        // Clients are expected to POST, but all methods are accepted and
        // dispatched identically.
        .route("/mcp", any(handle_meta))
        .route("/mcp/", any(handle_meta))
        .route("/mcp/{name}", any(handle_backend))
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16, shutdown: Arc<Notify>) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;
    Ok(())
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let mut backends = serde_json::Map::new();
    for (name, adapter) in state.registry.iter() {
        backends.insert(
            name.clone(),
            json!({
                "running": adapter.is_running(),
                "restart_count": adapter.restart_count(),
                "tools_cached": adapter.cached_tools().len(),
            }),
        );
    }
    Json(json!({"status": "healthy", "backends": backends}))
}

async fn handle_meta(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    if !state.enable_meta_mcp {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Meta-MCP disabled"})),
        );
    }

    let Ok(request) = serde_json::from_slice::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(protocol::error_response(
                Value::Null,
                protocol::PARSE_ERROR,
                "Parse error",
            )),
        );
    };

    (
        StatusCode::OK,
        Json(meta::handle(&state.registry, &request).await),
    )
}

async fn handle_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(adapter) = state.registry.get(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(protocol::error_response(
                Value::Null,
                protocol::UNKNOWN_BACKEND,
                format!("Unknown backend: {name}"),
            )),
        );
    };

    if let Err(e) = adapter.start().await {
        warn!(backend = %name, error = %e, "backend start failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(protocol::error_response(
                Value::Null,
                protocol::SERVER_ERROR,
                format!("Backend unavailable: {name}"),
            )),
        );
    }

    let Ok(request) = serde_json::from_slice::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(protocol::error_response(
                Value::Null,
                protocol::PARSE_ERROR,
                "Parse error",
            )),
        );
    };

    (StatusCode::OK, Json(adapter.send(request).await))
}
