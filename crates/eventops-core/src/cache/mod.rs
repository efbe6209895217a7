//! Coalescing read-through cache for API resources.
//!
//! This module provides the `ResourceCache` that every read of the
//! dashboard API goes through. Entries are memory-resident and live until
//! invalidated; they are never evicted by size.
//!
//! - Fresh entries (fetched less than `ttl` ago) are served without a request
//! - Concurrent reads of one key share a single in-flight request
//! - Rate-limited refreshes fall back to stale data when there is any
//! - Terminal failures drop the entry so the next read starts clean

mod coalesce;
mod options;
mod store;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::ApiError;
use crate::retry::Resolution;

use coalesce::Lease;
use store::CacheStore;

pub use options::GetOptions;
pub use store::EntryInfo;

/// Read-through cache keyed by resource path.
///
/// Clone is cheap and clones share the same table. Independent caches (one
/// per API base, one per test) are separate `ResourceCache::new` calls.
///
/// `get` spawns the fetch onto the current tokio runtime, so it must be
/// awaited from within one.
pub struct ResourceCache<T> {
    store: Arc<Mutex<CacheStore<T>>>,
    config: CacheConfig,
    next_fetch_id: Arc<AtomicU64>,
}

impl<T> Clone for ResourceCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
        }
    }
}

impl<T> Default for ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<T> ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(CacheStore::new(config.default_ttl()))),
            config,
            next_fetch_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read `key`, fetching it with `fetcher` unless a fresh copy is cached.
    ///
    /// `fetcher` may be called more than once when rate-limited requests are
    /// retried. Callers that arrive while a fetch for `key` is in flight wait
    /// for that fetch instead of calling their own `fetcher`, and see exactly
    /// the same result.
    pub async fn get<F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: GetOptions,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ApiError> + Send + 'static,
    {
        if key.trim().is_empty() {
            return Err(ApiError::unexpected("Resource key must not be empty"));
        }

        let lease = {
            let mut store = self.store.lock();
            if let Some(ttl) = options.ttl {
                store.set_ttl(key, ttl);
            }
            let entry = store.read(key);
            let ttl = options
                .ttl
                .or_else(|| entry.map(|e| e.ttl()))
                .unwrap_or_else(|| self.config.default_ttl());

            if !options.bypass_cache {
                if let Some(data) = entry.and_then(|e| e.fresh_data(ttl, Instant::now())) {
                    debug!(key = key, "Cache hit");
                    return Ok(data.clone());
                }
            }

            let stale = if options.serve_stale {
                entry.and_then(|e| e.data().cloned())
            } else {
                None
            };
            let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
            let policy = self.config.retry_policy(options.max_retries);
            let task_store = Arc::clone(&self.store);
            let join_store = Arc::clone(&self.store);
            let task_key = key.to_string();
            let join_key = key.to_string();

            coalesce::acquire(&mut store, key, id, move || {
                let task = tokio::spawn(async move {
                    let outcome = policy.execute(&task_key, fetcher, stale).await;
                    coalesce::release(&mut task_store.lock(), &task_key, id, &outcome, ttl);
                    debug!(key = %task_key, fetch = id, ok = outcome.is_ok(), "Fetch finished");
                    outcome.map(|resolution| resolution.into_inner())
                });
                async move {
                    match task.await {
                        Ok(result) => result,
                        // Panicked or aborted before release ran.
                        Err(e) => {
                            let err = ApiError::unexpected(format!("Fetch task failed: {}", e));
                            let outcome: Result<Resolution<T>, ApiError> = Err(err.clone());
                            coalesce::release(&mut join_store.lock(), &join_key, id, &outcome, ttl);
                            warn!(key = %join_key, fetch = id, "Fetch task failed");
                            Err(err)
                        }
                    }
                }
                .boxed()
            })
        };

        if lease.is_leader() {
            debug!(key = key, "Cache miss, fetching");
        } else {
            debug!(key = key, "Joining in-flight fetch");
        }
        lease.into_future().await
    }

    /// Drop the entry for `key`, e.g. after a mutation that affects it.
    ///
    /// A fetch already in flight for `key` still answers its waiters but no
    /// longer writes to the cache.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.store.lock().clear(key);
        if removed {
            debug!(key = key, "Invalidated");
        }
        removed
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        if prefix.is_empty() {
            return 0;
        }
        let removed = self.store.lock().clear_prefix(prefix);
        debug!(prefix = prefix, removed = removed, "Invalidated by prefix");
        removed
    }

    pub fn clear(&self) {
        self.store.lock().clear_all();
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.store.lock().read(key).map(|e| e.info(Instant::now()))
    }

    /// Snapshot of every entry, sorted by key.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let now = Instant::now();
        let mut infos: Vec<EntryInfo> =
            self.store.lock().entries().map(|e| e.info(now)).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
