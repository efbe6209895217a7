use std::time::Duration;

/// Per-call options for [`ResourceCache::get`](super::ResourceCache::get).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Skip the freshness check and always fetch. Still joins an in-flight fetch.
    pub bypass_cache: bool,
    /// Freshness window for this call and later checks on the same key.
    /// `None` keeps the entry's window, or the cache default for new keys.
    ///
    /// The window is stored on an existing entry as soon as the call is
    /// made, whether it hits, leads or follows. A fetch already in flight
    /// still writes its leader's window when it completes.
    pub ttl: Option<Duration>,
    /// Retry cap for rate-limited fetches. `None` uses the cache default.
    pub max_retries: Option<u32>,
    /// Answer a rate-limited fetch with previously cached data when there is any.
    pub serve_stale: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            bypass_cache: false,
            ttl: None,
            max_retries: None,
            serve_stale: true,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain single-flight read: no retries and no stale fallback.
    pub fn simple() -> Self {
        Self {
            max_retries: Some(0),
            serve_stale: false,
            ..Self::default()
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_ms(self, ttl_ms: u64) -> Self {
        self.with_ttl(Duration::from_millis(ttl_ms))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn without_stale(mut self) -> Self {
        self.serve_stale = false;
        self
    }
}
