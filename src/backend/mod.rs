pub mod error;
pub mod http;
pub mod sse;
pub mod stdio;

use serde_json::Value;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, TransportKind};
use crate::protocol;
use error::TransportError;
use http::HttpTransport;
use sse::SseTransport;
use stdio::StdioTransport;

/// Result of a transport handshake: whether the peer answered `initialize`,
/// and its `tools/list` reply if one was cached.
#[derive(Default)]
pub struct Handshake {
    pub initialized: bool,
    pub tools: Option<Value>,
}

/// Live transport state of an adapter. `None` in the adapter slot means
/// unstarted.
enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
}

impl Transport {
    async fn request(&mut self, request: &Value) -> Result<Value, TransportError> {
        match self {
            Transport::Stdio(t) => t.request(request).await,
            Transport::Http(t) => t.request(request).await,
            Transport::Sse(t) => t.request(request).await,
        }
    }

    /// Whether the transport can still carry requests. Only stdio can die
    /// behind our back (child exit); HTTP and SSE are connectionless.
    fn is_alive(&mut self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_alive(),
            Transport::Http(_) | Transport::Sse(_) => true,
        }
    }

    async fn shutdown(&mut self) {
        if let Transport::Stdio(t) = self {
            t.shutdown().await;
        }
    }
}

/// Per-backend runtime object owning transport state, the tools cache, and
/// usage bookkeeping.
///
/// One `tokio::sync::Mutex` serializes every transport operation, so
/// requests to the same backend execute strictly one at a time in arrival
/// order while different backends proceed concurrently. The cache and the
/// usage counters live outside that mutex so `/health` and the meta facade
/// can read them without queueing behind an in-flight request.
pub struct BackendAdapter {
    config: BackendConfig,
    transport: Mutex<Option<Transport>>,
    initialized: AtomicBool,
    running: AtomicBool,
    restart_count: AtomicU32,
    last_used: StdMutex<Instant>,
    tools_cache: StdMutex<Option<Value>>,
}

impl BackendAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            restart_count: AtomicU32::new(0),
            last_used: StdMutex::new(Instant::now()),
            tools_cache: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the last handshake got an `initialize` reply. A backend can
    /// be running but uninitialized (silent stdio child); it still serves
    /// requests, only caching is absent.
    #[allow(dead_code)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap()
    }

    /// The cached tool definitions, empty when nothing is cached.
    pub fn cached_tools(&self) -> Vec<Value> {
        self.tools_cache
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.get("result"))
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Start the backend if not running. Idempotent while the transport is
    /// alive; a dead stdio child is respawned.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut slot = self.transport.lock().await;
        self.start_locked(&mut slot).await
    }

    async fn start_locked(
        &self,
        slot: &mut Option<Transport>,
    ) -> Result<(), TransportError> {
        if let Some(transport) = slot.as_mut()
            && transport.is_alive()
        {
            return Ok(());
        }

        // Replace a dead transport; its child (if any) is already gone.
        if let Some(mut old) = slot.take() {
            old.shutdown().await;
        }

        let (transport, handshake) = match self.config.transport_type() {
            TransportKind::Stdio => {
                let (t, h) = StdioTransport::connect(&self.config).await?;
                self.restart_count.fetch_add(1, Ordering::Relaxed);
                (Transport::Stdio(t), h)
            }
            TransportKind::Http => {
                let (t, h) = HttpTransport::connect(&self.config).await;
                (Transport::Http(t), h)
            }
            TransportKind::Sse => {
                let (t, h) = SseTransport::connect(&self.config).await?;
                (Transport::Sse(t), h)
            }
        };

        self.initialized.store(handshake.initialized, Ordering::Release);
        *self.tools_cache.lock().unwrap() = handshake.tools;
        *self.last_used.lock().unwrap() = Instant::now();
        *slot = Some(transport);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the backend and discard session state and the tools cache. A
    /// restarted backend refreshes its view of the peer's tools.
    pub async fn stop(&self) {
        let mut slot = self.transport.lock().await;
        if let Some(mut transport) = slot.take() {
            transport.shutdown().await;
            info!(backend = %self.name(), "backend stopped");
        }
        self.initialized.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        *self.tools_cache.lock().unwrap() = None;
    }

    /// Forward one JSON-RPC request and return the JSON-RPC response.
    ///
    /// Failures come back as JSON-RPC error objects, never as panics or
    /// `Err`; the gateway keeps serving no matter what the backend does.
    pub async fn send(&self, request: Value) -> Value {
        *self.last_used.lock().unwrap() = Instant::now();
        let id = protocol::id_of(&request);

        // Cached tools/list short-circuit: deep copy with the id rewritten,
        // no transport round-trip.
        if protocol::method_of(&request) == "tools/list"
            && let Some(cached) = self.cached_tools_response(&id)
        {
            debug!(backend = %self.name(), "returning cached tools/list");
            return cached;
        }

        let mut slot = self.transport.lock().await;

        let needs_start = match slot.as_mut() {
            None => true,
            Some(transport) => !transport.is_alive(),
        };
        if needs_start && let Err(e) = self.start_locked(&mut slot).await {
            warn!(backend = %self.name(), error = %e, "backend unavailable");
            return TransportError::Unavailable.into_response(id);
        }

        let Some(transport) = slot.as_mut() else {
            return TransportError::Unavailable.into_response(id);
        };

        match transport.request(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(backend = %self.name(), error = %e, "transport error");
                e.into_response(id)
            }
        }
    }

    fn cached_tools_response(&self, id: &Value) -> Option<Value> {
        let cache = self.tools_cache.lock().unwrap();
        cache.as_ref().map(|cached| {
            let mut response = cached.clone();
            if let Some(obj) = response.as_object_mut() {
                obj.insert("id".to_string(), id.clone());
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_unstartable_backend_returns_unavailable() {
        let adapter = BackendAdapter::new(testutil::stdio_config("empty", ""));
        let response = adapter
            .send(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}))
            .await;
        assert_eq!(response["error"]["code"], -32000);
        assert_eq!(response["error"]["message"], "Backend unavailable");
        assert_eq!(response["id"], 1);
        assert!(!adapter.is_running());
    }

    #[tokio::test]
    async fn test_cached_tools_short_circuit_rewrites_id() {
        let adapter = BackendAdapter::new(testutil::stdio_config(
            "echo",
            testutil::SEQ_TOOLS_COMMAND,
        ));
        adapter.start().await.unwrap();
        assert_eq!(adapter.restart_count(), 1);
        assert!(adapter.is_initialized());
        assert_eq!(adapter.cached_tools().len(), 1);

        let first = adapter
            .send(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 8}))
            .await;
        assert_eq!(first["id"], 8);
        // seq 2 = the tools/list issued during the handshake; a transport
        // round-trip would have bumped it.
        assert_eq!(first["result"]["seq"], 2);

        let second = adapter
            .send(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 9}))
            .await;
        assert_eq!(second["id"], 9);
        assert_eq!(second["result"]["seq"], 2);
        assert_eq!(first["result"], second["result"]);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_cache_and_restart_refreshes_it() {
        let adapter = BackendAdapter::new(testutil::stdio_config(
            "echo",
            testutil::SEQ_TOOLS_COMMAND,
        ));
        adapter.start().await.unwrap();
        assert!(adapter.is_running());

        adapter.stop().await;
        assert!(!adapter.is_running());
        assert!(adapter.cached_tools().is_empty());

        // Lazy restart on the next request; a fresh child starts its
        // sequence over.
        let response = adapter
            .send(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}))
            .await;
        assert_eq!(adapter.restart_count(), 2);
        assert_eq!(response["result"]["seq"], 2);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_dead_child_respawns_on_next_request() {
        // `true` exits immediately: the handshake gets nothing, and every
        // request first respawns the child and then fails to write to it.
        let adapter = BackendAdapter::new(testutil::stdio_config("flaky", "true"));
        adapter.start().await.unwrap();
        assert_eq!(adapter.restart_count(), 1);
        assert!(!adapter.is_initialized());

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let response = adapter
            .send(json!({"jsonrpc": "2.0", "method": "m", "id": 2}))
            .await;
        assert_eq!(adapter.restart_count(), 2);
        assert!(response.get("error").is_some());
        assert_eq!(response["id"], 2);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized_fifo() {
        // `cat` echoes each request line; replies can only match their own
        // request if write/read pairs never interleave.
        let adapter = Arc::new(BackendAdapter::new(testutil::stdio_config("cat", "cat")));
        adapter.start().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let adapter = Arc::clone(&adapter);
            handles.push(tokio::spawn(async move {
                let request = json!({"jsonrpc": "2.0", "method": "echo", "id": i, "params": {"n": i}});
                let response = adapter.send(request.clone()).await;
                assert_eq!(response, request, "reply mismatch for call {i}");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_last_used_is_bumped_by_send() {
        let adapter = BackendAdapter::new(testutil::stdio_config("cat", "cat"));
        let before = adapter.last_used();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter
            .send(json!({"jsonrpc": "2.0", "method": "m", "id": 1}))
            .await;
        let after = adapter.last_used();
        assert!(after > before);

        adapter.stop().await;
    }
}
