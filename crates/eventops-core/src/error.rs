//! Normalized error type for every failure surfaced by the resource layer.
//!
//! Whatever goes wrong underneath (a non-2xx status, a dropped connection,
//! a misused call) callers see one shape: an [`ApiError`] with a kind, an
//! optional status, an optional server payload, and the original cause.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

/// Shared handle to the underlying error, so one failure can be observed by
/// every caller waiting on the same fetch.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// HTTP status signalling the server is shedding load.
pub const RATE_LIMIT_STATUS: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server responded with a non-2xx status.
    Http,
    /// The request was sent but no response came back (timeout, connection loss).
    NoResponse,
    /// Anything else, including misuse such as an empty resource key.
    Unexpected,
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    kind: ErrorKind,
    status: Option<u16>,
    payload: Option<Value>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl ApiError {
    /// Error for a response with a non-2xx status.
    pub fn http(status: u16, payload: Option<Value>) -> Self {
        let message = payload
            .as_ref()
            .and_then(message_from_payload)
            .unwrap_or_else(|| format!("Request failed with status {}", status));
        Self {
            kind: ErrorKind::Http,
            status: Some(status),
            payload,
            message,
            cause: None,
        }
    }

    /// Error for a request that never got a response.
    pub fn no_response(cause: Cause) -> Self {
        Self {
            kind: ErrorKind::NoResponse,
            status: None,
            payload: None,
            message: "No response received from server".to_string(),
            cause: Some(cause),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unexpected,
            status: None,
            payload: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the original error for diagnostics.
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(RATE_LIMIT_STATUS)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Normalize any supported failure into an [`ApiError`].
///
/// Normalizing an `ApiError` hands it back unchanged.
pub fn normalize<E: Into<ApiError>>(err: E) -> ApiError {
    err.into()
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status, body } => {
                let payload = if body.is_null() { None } else { Some(body) };
                let cause: Cause = Arc::new(TransportError::Status {
                    status,
                    body: payload.clone().unwrap_or(Value::Null),
                });
                ApiError::http(status, payload).with_cause(cause)
            }
            TransportError::NoResponse(cause) => ApiError::no_response(cause),
            TransportError::Other(message) => {
                let cause: Cause = Arc::new(TransportError::Other(message.clone()));
                ApiError::unexpected(message).with_cause(cause)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::unexpected(format!("Failed to decode response: {}", err))
            .with_cause(Arc::new(err))
    }
}

/// Server-provided message, from `detail` or `message` when either is a string.
/// Plain text bodies are used directly.
fn message_from_payload(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("detail")
            .and_then(Value::as_str)
            .or_else(|| map.get("message").and_then(Value::as_str)),
        _ => None,
    }?;
    if text.trim().is_empty() {
        return None;
    }
    Some(truncate_body(text))
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
