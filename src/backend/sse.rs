use futures_util::TryStreamExt;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use super::Handshake;
use super::error::TransportError;
use super::http::{INIT_TIMEOUT, build_headers, decode_reply};
use crate::config::BackendConfig;
use crate::protocol;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint-negotiated SSE transport.
///
/// A GET to the `/sse` URL yields an `endpoint` event naming the message
/// path; JSON-RPC requests are then POSTed to `base_url + path`. Unlike
/// streamable-http there is no fallback: a failed negotiation or
/// `initialize` leaves the backend unstarted.
pub struct SseTransport {
    name: String,
    message_url: String,
    client: reqwest::Client,
    headers: HeaderMap,
}

impl SseTransport {
    pub async fn connect(config: &BackendConfig) -> Result<(Self, Handshake), TransportError> {
        let url = config.http_url.clone().ok_or(TransportError::Unavailable)?;
        let base_url = url.strip_suffix("/sse").unwrap_or(&url).to_string();
        let client = reqwest::Client::new();

        let message_url =
            match tokio::time::timeout(INIT_TIMEOUT, negotiate_endpoint(&client, &url, &base_url))
                .await
            {
                Ok(Ok(message_url)) => message_url,
                Ok(Err(e)) => {
                    warn!(backend = %config.name, error = %e, "SSE endpoint negotiation failed");
                    return Err(TransportError::Unavailable);
                }
                Err(_) => {
                    warn!(backend = %config.name, "SSE endpoint negotiation timed out");
                    return Err(TransportError::Unavailable);
                }
            };

        info!(backend = %config.name, endpoint = %message_url, "SSE endpoint negotiated");

        let mut transport = Self {
            name: config.name.clone(),
            message_url,
            client,
            headers: build_headers(config),
        };

        let resp = transport
            .post(&protocol::initialize_request(), INIT_TIMEOUT)
            .await?;
        if !resp.status().is_success() {
            warn!(backend = %transport.name, status = %resp.status(), "SSE initialize rejected");
            return Err(TransportError::Unavailable);
        }
        info!(backend = %transport.name, "SSE handshake complete");

        let tools = transport.fetch_tools().await;
        Ok((
            transport,
            Handshake {
                initialized: true,
                tools,
            },
        ))
    }

    async fn fetch_tools(&mut self) -> Option<Value> {
        let resp = match self.post(&protocol::tools_list_request(), INIT_TIMEOUT).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(backend = %self.name, error = %e, "failed to cache tools");
                return None;
            }
        };
        match decode_reply(resp).await {
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

    async fn post(
        &mut self,
        request: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, TransportError> {
        Ok(self
            .client
            .post(&self.message_url)
            .headers(self.headers.clone())
            .json(request)
            .timeout(timeout)
            .send()
            .await?)
    }

    pub async fn request(&mut self, request: &Value) -> Result<Value, TransportError> {
        let resp = self.post(request, REQUEST_TIMEOUT).await?;
        decode_reply(resp).await
    }
}

/// Read the SSE stream until an `endpoint` event names the message path.
async fn negotiate_endpoint(
    client: &reqwest::Client,
    url: &str,
    base_url: &str,
) -> Result<String, TransportError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(TransportError::Wire(format!(
            "SSE connect failed: {}",
            resp.status()
        )));
    }

    let reader = StreamReader::new(resp.bytes_stream().map_err(std::io::Error::other));
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if let Some(path) = line.strip_prefix("data: ")
            && path.contains("/message")
        {
            return Ok(format!("{base_url}{path}"));
        }
    }

    Err(TransportError::Wire(
        "no SSE endpoint received".to_string(),
    ))
}
