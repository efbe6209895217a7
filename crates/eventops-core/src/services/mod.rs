//! Named wrappers binding fixed API paths to the resource cache.
//!
//! Every read goes through [`ResourceCache::get`] with the caller's
//! [`GetOptions`] passed through untouched, and errors come back exactly as
//! `get` produced them. Mutations skip the cache and then invalidate the
//! keys they affect.

pub mod camera;
pub mod lost_found;
pub mod map;

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::cache::{GetOptions, ResourceCache};
use crate::error::ApiError;
use crate::retry::Resolution;
use crate::transport::{Request, Transport, TransportError};

pub use camera::CameraService;
pub use lost_found::LostFoundService;
pub use map::MapService;

/// Transport plus cache, shared by the concrete services.
#[derive(Clone)]
pub(crate) struct ServiceCore {
    transport: Arc<dyn Transport>,
    cache: ResourceCache<Value>,
}

impl ServiceCore {
    pub(crate) fn new(transport: Arc<dyn Transport>, cache: ResourceCache<Value>) -> Self {
        Self { transport, cache }
    }

    pub(crate) fn cache(&self) -> &ResourceCache<Value> {
        &self.cache
    }

    /// Cached read of `request` under `key`. Only GET requests are cacheable.
    pub(crate) async fn read(
        &self,
        key: &str,
        request: Request,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        if request.method.is_mutation() {
            return Err(ApiError::unexpected(format!(
                "Refusing to cache {} {}",
                request.method.as_str(),
                request.path
            )));
        }
        self.cache
            .get(key, fetcher(Arc::clone(&self.transport), request), options)
            .await
    }

    /// Uncached request for mutations.
    pub(crate) async fn send(&self, request: Request) -> Result<Value, ApiError> {
        self.fetch(request, None).await
    }

    /// Uncached request. Rate-limited attempts are retried with the cache's
    /// policy but never answered from a cached copy, and nothing is stored.
    pub(crate) async fn fetch(
        &self,
        request: Request,
        max_retries: Option<u32>,
    ) -> Result<Value, ApiError> {
        let label = format!("{} {}", request.method.as_str(), request.path);
        self.cache
            .config()
            .retry_policy(max_retries)
            .execute(&label, fetcher(Arc::clone(&self.transport), request), None)
            .await
            .map(Resolution::into_inner)
    }
}

/// Fetcher issuing a fresh copy of `request` on every call.
fn fetcher(
    transport: Arc<dyn Transport>,
    request: Request,
) -> impl FnMut() -> BoxFuture<'static, Result<Value, TransportError>> + Send + 'static {
    move || {
        let transport = Arc::clone(&transport);
        let request = request.clone();
        async move { transport.issue(request).await.map(|response| response.body) }.boxed()
    }
}

/// Percent-encode one path segment.
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Non-empty string or number; other values count as absent.
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for service tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::transport::{Method, Response};

    /// Answers by `(method, path)` and records every request.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        routes: Mutex<HashMap<(Method, String), Result<Value, TransportError>>>,
        pub(crate) requests: Mutex<Vec<Request>>,
    }

    impl FakeTransport {
        pub(crate) fn route(&self, method: Method, path: &str, body: Value) {
            self.routes.lock().insert((method, path.to_string()), Ok(body));
        }

        pub(crate) fn fail(&self, method: Method, path: &str, status: u16, body: Value) {
            self.routes
                .lock()
                .insert((method, path.to_string()), Err(TransportError::Status { status, body }));
        }

        pub(crate) fn count(&self, method: Method, path: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.method == method && r.path == path)
                .count()
        }

        pub(crate) fn last(&self) -> Option<Request> {
            self.requests.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn issue(&self, request: Request) -> Result<Response, TransportError> {
            self.requests.lock().push(request.clone());
            let route = self
                .routes
                .lock()
                .get(&(request.method, request.path.clone()))
                .cloned();
            match route {
                Some(Ok(body)) => Ok(Response { status: 200, body }),
                Some(Err(err)) => Err(err),
                None => Err(TransportError::Status {
                    status: 404,
                    body: Value::Null,
                }),
            }
        }
    }
}
