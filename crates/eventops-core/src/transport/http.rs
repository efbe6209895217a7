//! reqwest-backed transport for the dashboard REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use super::{Method, Request, Response, Transport, TransportError};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP transport for the dashboard API. Clones share one connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    /// Create a new transport for the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Create a new transport with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn headers(&self, request: &Request) -> Result<header::HeaderMap, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| TransportError::Other(format!("Invalid token: {}", e)))?,
            );
        }
        for (name, value) in &request.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| {
                    TransportError::Other(format!("Invalid header name {}: {}", name, e))
                })?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Decode a body as JSON, keeping non-JSON text as a JSON string.
    async fn read_body(response: reqwest::Response) -> Result<Value, TransportError> {
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to read response body: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(&self, request: Request) -> Result<Response, TransportError> {
        let url = self.url(&request.path);
        debug!(method = request.method.as_str(), url = %url, "→ request");

        let mut builder = self
            .client
            .request(reqwest_method(request.method), &url)
            .headers(self.headers(&request)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::Other(format!("Failed to build request to {}: {}", url, e))
            } else {
                TransportError::NoResponse(Arc::new(e))
            }
        })?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %url, "← response");

        let body = Self::read_body(response).await?;
        if status.is_success() {
            Ok(Response {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
