use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::Handshake;
use super::error::TransportError;
use crate::config::BackendConfig;
use crate::protocol;

pub(crate) const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Session header echoed between gateway and streamable-http servers.
pub(crate) const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable-HTTP transport: one POST per JSON-RPC message, optional
/// server-assigned session id, replies either plain JSON or framed as a
/// single-event SSE stream.
pub struct HttpTransport {
    name: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: Option<String>,
}

/// Fixed headers merged with the backend's configured ones. Config values
/// override the fixed set.
pub(crate) fn build_headers(config: &BackendConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    for (key, value) in &config.headers {
        match (
            key.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            (Ok(name), Ok(val)) => {
                headers.insert(name, val);
            }
            _ => {
                warn!(backend = %config.name, header = %key, "skipping unparseable custom header");
            }
        }
    }
    headers
}

/// Decode a backend reply: SSE-framed responses are scanned for the first
/// `data:` line carrying a JSON object, everything else is parsed as a plain
/// JSON body.
pub(crate) async fn decode_reply(resp: reqwest::Response) -> Result<Value, TransportError> {
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("text/event-stream") {
        let reader = StreamReader::new(resp.bytes_stream().map_err(std::io::Error::other));
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(data) = line.trim().strip_prefix("data: ")
                && let Ok(value) = serde_json::from_str::<Value>(data)
            {
                return Ok(value);
            }
        }
        return Err(TransportError::Wire(
            "event stream ended without a data frame".to_string(),
        ));
    }

    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| TransportError::Parse(e.to_string()))
}

impl HttpTransport {
    /// Connect and handshake. This never fails: some streamable-http servers
    /// are stateless and have no meaningful `initialize`, so handshake
    /// errors are swallowed and the transport reports itself initialized.
    pub async fn connect(config: &BackendConfig) -> (Self, Handshake) {
        let mut transport = Self {
            name: config.name.clone(),
            url: config.http_url.clone().unwrap_or_default(),
            client: reqwest::Client::new(),
            headers: build_headers(config),
            session_id: None,
        };

        let mut handshake = Handshake {
            initialized: true,
            tools: None,
        };

        match transport
            .post(&protocol::initialize_request(), INIT_TIMEOUT)
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if let Some(session) = &transport.session_id {
                    info!(backend = %transport.name, session = %session, "HTTP session established");
                } else {
                    info!(backend = %transport.name, "HTTP handshake complete");
                }
                handshake.tools = transport.fetch_tools().await;
            }
            Ok(resp) => {
                // Some servers don't implement initialize at all.
                debug!(backend = %transport.name, status = %resp.status(), "HTTP init rejected, continuing anyway");
            }
            Err(e) => {
                warn!(backend = %transport.name, error = %e, "HTTP init failed, continuing anyway");
            }
        }

        (transport, handshake)
    }

    async fn fetch_tools(&mut self) -> Option<Value> {
        match self.round_trip(&protocol::tools_list_request(), INIT_TIMEOUT).await {
            Ok(reply) if reply.get("result").is_some() => {
                let count = reply["result"]["tools"].as_array().map_or(0, Vec::len);
                info!(backend = %self.name, tools = count, "cached tools");
                Some(reply)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(backend = %self.name, error = %e, "failed to cache tools");
                None
            }
        }
    }

    /// POST the raw request, refreshing the session id from the reply headers.
    async fn post(
        &mut self,
        request: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, TransportError> {
        let mut headers = self.headers.clone();
        if let Some(session) = &self.session_id
            && let Ok(value) = session.parse::<HeaderValue>()
        {
            headers.insert(SESSION_HEADER, value);
        }

        let resp = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(request)
            .timeout(timeout)
            .send()
            .await?;

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        Ok(resp)
    }

    async fn round_trip(
        &mut self,
        request: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let resp = self.post(request, timeout).await?;
        decode_reply(resp).await
    }

    pub async fn request(&mut self, request: &Value) -> Result<Value, TransportError> {
        self.round_trip(request, REQUEST_TIMEOUT).await
    }
}
