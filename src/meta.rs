//! Meta facade: the gateway speaking MCP itself at `/mcp`.
//!
//! Instead of advertising the union of every backend's tools, the facade
//! exposes four fixed discovery/invocation tools, collapsing the client's
//! tool list to a constant regardless of how many backends are configured.

use serde_json::{Value, json};
use tracing::warn;

use crate::protocol;
use crate::registry::Registry;

const SERVER_DESCRIPTION: &str =
    "Universal MCP gateway with dynamic tool discovery across backends";

/// Dispatch one JSON-RPC request addressed to the facade.
pub async fn handle(registry: &Registry, request: &Value) -> Value {
    let method = protocol::method_of(request);
    let id = protocol::id_of(request);

    match method {
        "initialize" => initialize_response(id),
        "tools/list" => tools_list_response(id),
        "tools/call" => tools_call(registry, request, id).await,
        m if m.starts_with("notifications/") => {
            json!({"jsonrpc": protocol::JSONRPC_VERSION, "result": null, "id": id})
        }
        m => protocol::error_response(
            id,
            protocol::METHOD_NOT_FOUND,
            format!("Unknown method: {m}"),
        ),
    }
}

fn initialize_response(id: Value) -> Value {
    protocol::result_response(
        id,
        json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {
                "name": protocol::CLIENT_NAME,
                "version": protocol::SERVER_VERSION,
                "description": SERVER_DESCRIPTION,
            },
        }),
    )
}

/// The fixed four-tool schema advertised to clients.
fn tools_list_response(id: Value) -> Value {
    let tools = json!([
        {
            "name": "gateway_list_servers",
            "description": "List all available MCP backend servers",
            "inputSchema": {"type": "object", "properties": {}, "required": []},
        },
        {
            "name": "gateway_list_tools",
            "description": "List all tools from a specific backend server",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Name of the backend server",
                    },
                },
                "required": ["server"],
            },
        },
        {
            "name": "gateway_search_tools",
            "description": "Search for tools across all backends by keyword",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search keyword",
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Max results (default 10)",
                        "default": 10,
                    },
                },
                "required": ["query"],
            },
        },
        {
            "name": "gateway_invoke",
            "description": "Invoke a tool on a specific backend",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Backend server name",
                    },
                    "tool": {
                        "type": "string",
                        "description": "Tool name to invoke",
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Tool arguments",
                        "default": {},
                    },
                },
                "required": ["server", "tool"],
            },
        },
    ]);

    protocol::result_response(id, json!({"tools": tools}))
}

async fn tools_call(registry: &Registry, request: &Value, id: Value) -> Value {
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
    let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match tool {
        "gateway_list_servers" => list_servers(registry, id),
        "gateway_list_tools" => list_tools(registry, &arguments, id).await,
        "gateway_search_tools" => search_tools(registry, &arguments, id).await,
        "gateway_invoke" => invoke(registry, &arguments, id).await,
        other => protocol::error_response(
            id,
            protocol::METHOD_NOT_FOUND,
            format!("Unknown tool: {other}"),
        ),
    }
}

/// Snapshot of every registered backend. Reads only cached state and never
/// starts anything.
fn list_servers(registry: &Registry, id: Value) -> Value {
    let servers: Vec<Value> = registry
        .iter()
        .map(|(name, adapter)| {
            json!({
                "name": name,
                "description": adapter.config().description,
                "transport": adapter.config().transport_type().to_string(),
                "running": adapter.is_running(),
                "tools_count": adapter.cached_tools().len(),
            })
        })
        .collect();

    protocol::tool_result(id, &json!({"servers": servers}))
}

async fn list_tools(registry: &Registry, arguments: &Value, id: Value) -> Value {
    let server = arguments
        .get("server")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let Some(server) = server else {
        return protocol::error_response(
            id,
            protocol::INVALID_PARAMS,
            "Missing 'server' parameter",
        );
    };

    let Some(adapter) = registry.get(server) else {
        return protocol::error_response(
            id,
            protocol::UNKNOWN_BACKEND,
            format!("Unknown server: {server}"),
        );
    };

    // Started lazily so the cache is populated.
    if let Err(e) = adapter.start().await {
        warn!(backend = %server, error = %e, "failed to start backend");
    }
    let tools = adapter.cached_tools();

    protocol::tool_result(id, &json!({"server": server, "tools": tools}))
}

async fn search_tools(registry: &Registry, arguments: &Value, id: Value) -> Value {
    let query = arguments
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    if query.is_empty() {
        return protocol::error_response(
            id,
            protocol::INVALID_PARAMS,
            "Missing 'query' parameter",
        );
    }
    let limit = arguments
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(10) as usize;

    let mut matches: Vec<Value> = Vec::new();

    // Registration-order scan with an early exit once the cap is reached:
    // backends past that point are never even started. Once the limit is hit
    // mid-backend, the rest of that backend's tools are skipped too.
    'backends: for (name, adapter) in registry.iter() {
        if matches.len() >= limit {
            break;
        }
        if let Err(e) = adapter.start().await {
            warn!(backend = %name, error = %e, "failed to start backend for search");
        }
        for tool in adapter.cached_tools() {
            let tool_name = tool.get("name").and_then(Value::as_str).unwrap_or("");
            let tool_desc = tool.get("description").and_then(Value::as_str).unwrap_or("");

            if tool_name.to_lowercase().contains(&query)
                || tool_desc.to_lowercase().contains(&query)
            {
                matches.push(json!({
                    "server": name,
                    "tool": tool_name,
                    "description": tool_desc.chars().take(200).collect::<String>(),
                }));
            }

            if matches.len() >= limit {
                break 'backends;
            }
        }
    }

    protocol::tool_result(
        id,
        &json!({"query": query, "matches": matches, "total": matches.len()}),
    )
}

async fn invoke(registry: &Registry, arguments: &Value, id: Value) -> Value {
    let server = arguments
        .get("server")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let Some(server) = server else {
        return protocol::error_response(
            id,
            protocol::INVALID_PARAMS,
            "Missing 'server' parameter",
        );
    };

    let tool = arguments
        .get("tool")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let Some(tool) = tool else {
        return protocol::error_response(
            id,
            protocol::INVALID_PARAMS,
            "Missing 'tool' parameter",
        );
    };

    let Some(adapter) = registry.get(server) else {
        return protocol::error_response(
            id,
            protocol::UNKNOWN_BACKEND,
            format!("Unknown server: {server}"),
        );
    };

    let tool_args = arguments
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    // Forwarded verbatim; whatever the backend answers, including its own
    // errors, is the reply.
    let call = json!({
        "jsonrpc": protocol::JSONRPC_VERSION,
        "method": "tools/call",
        "id": id,
        "params": {"name": tool, "arguments": tool_args},
    });

    adapter.send(call).await
}
