use serde_json::Value;
use thiserror::Error;

use crate::protocol;

/// Transport-level failures surfaced to clients as JSON-RPC error objects.
///
/// These never cross the adapter boundary as `Err`: `BackendAdapter::send`
/// converts them into response values, so a broken backend degrades to an
/// error reply instead of tearing down the request handler.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend could not be started (spawn failure, missing command,
    /// failed SSE endpoint negotiation).
    #[error("Backend unavailable")]
    Unavailable,

    /// A bounded wait for the backend's reply elapsed.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Wire-level I/O failure; carries the original message.
    #[error("{0}")]
    Wire(String),

    /// The backend replied with something that is not JSON.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TransportError {
    pub fn code(&self) -> i64 {
        match self {
            TransportError::Parse(_) => protocol::PARSE_ERROR,
            _ => protocol::SERVER_ERROR,
        }
    }

    /// Render as a JSON-RPC error response echoing the request id.
    pub fn into_response(self, id: Value) -> Value {
        protocol::error_response(id, self.code(), self.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Wire(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Wire(e.to_string())
        }
    }
}
