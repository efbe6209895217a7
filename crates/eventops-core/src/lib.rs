//! eventops core - a coalescing read-through cache over the event-operations
//! dashboard API.
//!
//! Reads go through [`ResourceCache::get`]: fresh entries are answered from
//! memory, concurrent reads of one resource share a single request, and
//! rate-limited refreshes back off and fall back to the last good copy.
//! [`LostFoundService`], [`CameraService`] and [`MapService`] bind the
//! dashboard's endpoints to the cache over a [`Transport`], normally
//! [`HttpTransport`].

pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod services;
pub mod transport;

pub use cache::{EntryInfo, GetOptions, ResourceCache};
pub use config::{CacheConfig, Settings};
pub use error::{normalize, ApiError, ErrorKind};
pub use retry::{Backoff, Classification, Resolution, RetryPolicy};
pub use services::{CameraService, LostFoundService, MapService};
pub use transport::{HttpTransport, Method, Request, Response, Transport, TransportError};
