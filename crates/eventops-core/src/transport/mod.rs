//! Transport boundary between the resource cache and the remote API.
//!
//! The cache never talks HTTP itself. It consumes a [`Transport`], which
//! issues one request and reports either a decoded response or a
//! [`TransportError`]. [`HttpTransport`] is the reqwest-backed
//! implementation used against the dashboard API.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::Cause;

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Mutating methods bypass the cache entirely.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/cctvs/summary`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// A response arrived with a non-2xx status.
    #[error("Request failed with status {status}")]
    Status { status: u16, body: Value },

    /// The request was sent but nothing came back.
    #[error("No response received from server: {0}")]
    NoResponse(Cause),

    /// The request could not be built or its response could not be read.
    #[error("{0}")]
    Other(String),
}

/// Issues a single request against the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, request: Request) -> Result<Response, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(!Method::Get.is_mutation());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(method.is_mutation(), "{} should mutate", method.as_str());
        }
    }

    #[test]
    fn test_request_builders() {
        let req = Request::post("/upload_lost", json!({"name": "Asha"}))
            .with_query([("threshold", "0.8")])
            .with_header("X-Tenant", "north-gate");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/upload_lost");
        assert_eq!(req.query, vec![("threshold".to_string(), "0.8".to_string())]);
        assert_eq!(req.body, Some(json!({"name": "Asha"})));
        assert_eq!(req.headers.len(), 1);
    }
}
