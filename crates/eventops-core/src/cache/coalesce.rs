//! Single-flight coordination on top of the cache store.
//!
//! Both functions here expect the store lock to be held by the caller, so
//! "is something pending? if not, mark pending" is one critical section.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use super::store::{CacheStore, FetchFuture, PendingFetch};
use crate::error::ApiError;
use crate::retry::Resolution;

pub(crate) enum Lease<T> {
    /// This caller started the fetch.
    Leader(FetchFuture<T>),
    /// Another caller's fetch was already in flight.
    Follower(FetchFuture<T>),
}

impl<T> Lease<T> {
    pub(crate) fn is_leader(&self) -> bool {
        matches!(self, Lease::Leader(_))
    }

    pub(crate) fn into_future(self) -> FetchFuture<T> {
        match self {
            Lease::Leader(future) | Lease::Follower(future) => future,
        }
    }
}

/// Join the in-flight fetch for `key`, or start one with `start` and mark it
/// pending under `id`.
pub(crate) fn acquire<T, S>(store: &mut CacheStore<T>, key: &str, id: u64, start: S) -> Lease<T>
where
    T: Clone,
    S: FnOnce() -> BoxFuture<'static, Result<T, ApiError>>,
{
    if let Some(pending) = store.read(key).and_then(|entry| entry.pending()) {
        return Lease::Follower(pending.future.clone());
    }

    let future = start().shared();
    store.mark_pending(
        key,
        PendingFetch {
            id,
            future: future.clone(),
        },
    );
    Lease::Leader(future)
}

/// Apply a finished fetch to the store.
///
/// Only the fetch currently marked pending for `key` may touch the entry. If
/// the entry was invalidated (or invalidated and re-leased) while this fetch
/// was in flight, the outcome still reaches its waiters but the store is left
/// alone. Returns whether the store was updated.
pub(crate) fn release<T>(
    store: &mut CacheStore<T>,
    key: &str,
    id: u64,
    outcome: &Result<Resolution<T>, ApiError>,
    ttl: Duration,
) -> bool
where
    T: Clone,
{
    let owns_entry = store
        .read(key)
        .and_then(|entry| entry.pending())
        .is_some_and(|pending| pending.id == id);
    if !owns_entry {
        debug!(key = key, fetch = id, "Entry changed during fetch, discarding update");
        return false;
    }

    match outcome {
        Ok(Resolution::Fetched(data)) => store.write(key, data.clone(), ttl),
        // Stale data stays stale so the next call fetches again.
        Ok(Resolution::Stale(_)) => store.clear_pending(key),
        Err(_) => {
            store.clear(key);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(30);

    fn ready(value: u32) -> BoxFuture<'static, Result<u32, ApiError>> {
        async move { Ok(value) }.boxed()
    }

    #[tokio::test]
    async fn test_first_caller_leads_and_others_follow() {
        let mut store = CacheStore::new(TTL);
        let started = AtomicUsize::new(0);

        let first = acquire(&mut store, "zones", 1, || {
            started.fetch_add(1, Ordering::SeqCst);
            ready(1)
        });
        let second = acquire(&mut store, "zones", 2, || {
            started.fetch_add(1, Ordering::SeqCst);
            ready(2)
        });

        assert!(first.is_leader());
        assert!(!second.is_leader());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(first.into_future().await.unwrap(), 1);
        assert_eq!(second.into_future().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_allows_new_leader() {
        let mut store = CacheStore::new(TTL);
        let lease = acquire(&mut store, "zones", 1, || ready(1));
        assert!(lease.is_leader());

        assert!(release(&mut store, "zones", 1, &Ok(Resolution::Fetched(1)), TTL));
        assert_eq!(store.read("zones").unwrap().data(), Some(&1));
        assert!(store.read("zones").unwrap().pending().is_none());

        let lease = acquire(&mut store, "zones", 2, || ready(2));
        assert!(lease.is_leader());
    }

    #[tokio::test]
    async fn test_failed_release_clears_entry() {
        let mut store = CacheStore::new(TTL);
        store.write("zones", 1, TTL);
        let _lease = acquire(&mut store, "zones", 1, || ready(1));

        let outcome: Result<Resolution<u32>, ApiError> = Err(ApiError::http(500, None));
        assert!(release(&mut store, "zones", 1, &outcome, TTL));
        assert!(store.read("zones").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_fetched_at() {
        let mut store = CacheStore::new(TTL);
        store.write("zones", 1, TTL);
        let fetched_at = store.read("zones").unwrap().fetched_at();
        tokio::time::advance(Duration::from_secs(60)).await;

        let _lease = acquire(&mut store, "zones", 1, || ready(1));
        assert!(release(&mut store, "zones", 1, &Ok(Resolution::Stale(1)), TTL));

        let entry = store.read("zones").unwrap();
        assert!(entry.pending().is_none());
        assert_eq!(entry.fetched_at(), fetched_at);
    }

    #[tokio::test]
    async fn test_release_after_invalidation_is_discarded() {
        let mut store = CacheStore::new(TTL);
        let _old = acquire(&mut store, "zones", 1, || ready(1));
        store.clear("zones");
        let _new = acquire(&mut store, "zones", 2, || ready(2));

        assert!(!release(&mut store, "zones", 1, &Ok(Resolution::Fetched(1)), TTL));
        let entry = store.read("zones").unwrap();
        assert!(entry.data().is_none());
        assert_eq!(entry.pending().map(|p| p.id), Some(2));

        assert!(release(&mut store, "zones", 2, &Ok(Resolution::Fetched(2)), TTL));
        assert_eq!(store.read("zones").unwrap().data(), Some(&2));
    }
}
