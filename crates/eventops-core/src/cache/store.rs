//! Key to entry table. No locking and no policy live here; the owning
//! [`ResourceCache`](super::ResourceCache) serializes access.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::ApiError;

/// Shared outcome of one in-flight fetch.
pub(crate) type FetchFuture<T> = Shared<BoxFuture<'static, Result<T, ApiError>>>;

/// Handle to the in-flight fetch for a key.
#[derive(Clone)]
pub(crate) struct PendingFetch<T> {
    pub(crate) id: u64,
    pub(crate) future: FetchFuture<T>,
}

pub(crate) struct CacheEntry<T> {
    key: String,
    data: Option<T>,
    fetched_at: Option<Instant>,
    cached_at: Option<DateTime<Utc>>,
    ttl: Duration,
    pending: Option<PendingFetch<T>>,
}

impl<T> CacheEntry<T> {
    fn new(key: &str, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            data: None,
            fetched_at: None,
            cached_at: None,
            ttl,
            pending: None,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub(crate) fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn pending(&self) -> Option<&PendingFetch<T>> {
        self.pending.as_ref()
    }

    /// Data, if it was fetched less than `ttl` before `now`.
    pub(crate) fn fresh_data(&self, ttl: Duration, now: Instant) -> Option<&T> {
        let fetched_at = self.fetched_at?;
        if now.saturating_duration_since(fetched_at) < ttl {
            self.data.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            key: self.key().to_string(),
            has_data: self.data.is_some(),
            fetched_at: self.fetched_at(),
            cached_at: self.cached_at,
            ttl: self.ttl,
            is_fresh: self.fresh_data(self.ttl, now).is_some(),
            is_pending: self.pending.is_some(),
        }
    }
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub has_data: bool,
    pub fetched_at: Option<Instant>,
    /// Wall-clock time of the last successful fetch, for display.
    pub cached_at: Option<DateTime<Utc>>,
    pub ttl: Duration,
    pub is_fresh: bool,
    pub is_pending: bool,
}

impl EntryInfo {
    pub fn age_display(&self) -> String {
        let Some(cached_at) = self.cached_at else {
            return "never".to_string();
        };
        let seconds = (Utc::now() - cached_at).num_seconds();
        if seconds < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if seconds < 60 {
            format!("{}s ago", seconds)
        } else if seconds < 3600 {
            format!("{}m ago", seconds / 60)
        } else {
            format!("{}h ago", seconds / 3600)
        }
    }
}

pub(crate) struct CacheStore<T> {
    entries: HashMap<String, CacheEntry<T>>,
    default_ttl: Duration,
}

impl<T> CacheStore<T> {
    pub(crate) fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    pub(crate) fn read(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    /// Record a successful fetch and clear `pending`.
    pub(crate) fn write(&mut self, key: &str, data: T, ttl: Duration) {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(key, ttl));
        entry.data = Some(data);
        entry.fetched_at = Some(Instant::now());
        entry.cached_at = Some(Utc::now());
        entry.ttl = ttl;
        entry.pending = None;
    }

    /// Attach an in-flight fetch, creating the entry on first access.
    pub(crate) fn mark_pending(&mut self, key: &str, pending: PendingFetch<T>) {
        let default_ttl = self.default_ttl;
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(key, default_ttl))
            .pending = Some(pending);
    }

    /// Change the freshness window of an existing entry.
    pub(crate) fn set_ttl(&mut self, key: &str, ttl: Duration) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.ttl = ttl;
        }
    }

    /// Detach the in-flight fetch, leaving data and `fetched_at` as they are.
    pub(crate) fn clear_pending(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pending = None;
        }
    }

    /// Delete the entry. Returns whether one existed.
    pub(crate) fn clear(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Delete every entry whose key starts with `prefix`. Returns how many went.
    pub(crate) fn clear_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub(crate) fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &CacheEntry<T>> {
        self.entries.values()
    }
}
