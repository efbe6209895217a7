//! Retry with capped exponential backoff for rate-limited requests.
//!
//! Only the rate-limit class is retried. When the caller has stale data on
//! hand, a rate-limited response resolves to that data straight away rather
//! than waiting out a backoff: availability wins over freshness while the
//! server is shedding load.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{normalize, ApiError};

/// Whether a failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Terminal,
}

/// Default classifier: HTTP 429 is retryable, everything else is terminal.
pub fn classify_rate_limit(err: &ApiError) -> Classification {
    if err.is_rate_limited() {
        Classification::Retryable
    } else {
        Classification::Terminal
    }
}

/// Delay shape between attempts: `min(cap, base * 2^attempt) + jitter`,
/// with jitter uniform in `[0, max_jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_jitter: Duration) -> Self {
        Self {
            base,
            cap,
            max_jitter,
        }
    }

    /// Delay before jitter for the given attempt number.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.exponential(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// How a successful [`RetryPolicy::execute`] was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// A transport attempt succeeded.
    Fetched(T),
    /// A rate-limited attempt was answered with previously cached data.
    Stale(T),
}

impl<T> Resolution<T> {
    pub fn into_inner(self) -> T {
        match self {
            Resolution::Fetched(data) | Resolution::Stale(data) => data,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Resolution::Stale(_))
    }
}

#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; 0 disables retry.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub classify: fn(&ApiError) -> Classification,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            classify: classify_rate_limit,
        }
    }

    pub fn with_classifier(mut self, classify: fn(&ApiError) -> Classification) -> Self {
        self.classify = classify;
        self
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out.
    ///
    /// `stale` is the last known-good value for the resource; when present a
    /// retryable failure resolves to it immediately. Terminal failures are
    /// never answered from `stale`.
    pub async fn execute<T, F, Fut, E>(
        &self,
        key: &str,
        mut operation: F,
        stale: Option<T>,
    ) -> Result<Resolution<T>, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        let mut stale = stale;
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(data) => return Ok(Resolution::Fetched(data)),
                Err(e) => normalize(e),
            };

            if (self.classify)(&err) == Classification::Terminal {
                debug!(key = key, status = ?err.status(), "Terminal failure, not retrying");
                return Err(err);
            }

            if let Some(data) = stale.take() {
                warn!(key = key, "Rate limited, serving stale data");
                return Ok(Resolution::Stale(data));
            }

            if attempt >= self.max_retries {
                warn!(key = key, attempts = attempt + 1, "Rate limited, retries exhausted");
                return Err(err);
            }

            attempt += 1;
            let delay = self.backoff.delay(attempt);
            warn!(
                key = key,
                retry = attempt,
                backoff_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
