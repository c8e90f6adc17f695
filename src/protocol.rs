//! JSON-RPC 2.0 helpers for the MCP dialect spoken on both sides of the
//! gateway.
//!
//! Requests and responses are passed through as raw `serde_json::Value`
//! objects rather than typed structs, since the gateway must forward
//! payloads verbatim, including fields it does not understand.

use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version advertised in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const CLIENT_NAME: &str = "mcp-gateway";
pub const CLIENT_VERSION: &str = "1.0";
pub const SERVER_VERSION: &str = "1.0.0";

// JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;
pub const UNKNOWN_BACKEND: i64 = -32001;

/// The `initialize` request sent to every backend on handshake.
pub fn initialize_request() -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "initialize",
        "id": 0,
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
        },
    })
}

/// The `tools/list` request used to populate the tools cache.
pub fn tools_list_request() -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "method": "tools/list", "id": 1})
}

pub fn result_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "result": result, "id": id})
}

pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "error": {"code": code, "message": message.into()},
        "id": id,
    })
}

/// Wrap a payload in an MCP tool-result envelope: a single text content
/// block carrying the pretty-printed JSON.
pub fn tool_result(id: Value, payload: &Value) -> Value {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    result_response(id, json!({"content": [{"type": "text", "text": text}]}))
}

pub fn method_of(request: &Value) -> &str {
    request.get("method").and_then(Value::as_str).unwrap_or("")
}

/// The request `id`, cloned; `null` when absent.
pub fn id_of(request: &Value) -> Value {
    request.get("id").cloned().unwrap_or(Value::Null)
}

/// A request without an `id` field is a notification.
pub fn is_notification(request: &Value) -> bool {
    request.get("id").is_none()
}
