//! Configuration for the resource cache and the API it fronts.
//!
//! Settings are stored at `~/.config/eventops/config.json`. A missing file
//! means defaults. Deployment-level environment variables override the file:
//! `EVENTOPS_API_URL`, `EVENTOPS_CACHE_TTL_MS`, `EVENTOPS_CACHE_MAX_RETRIES`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retry::{Backoff, RetryPolicy};

/// Application name used for config directory paths
const APP_NAME: &str = "eventops";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Freshness window for cached reads unless a call overrides it.
pub const DEFAULT_TTL_MS: u64 = 30_000;

/// Retries for rate-limited (429) requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 150;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 2_000;
pub const DEFAULT_JITTER_MS: u64 = 100;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

pub const ENV_API_URL: &str = "EVENTOPS_API_URL";
pub const ENV_CACHE_TTL_MS: &str = "EVENTOPS_CACHE_TTL_MS";
pub const ENV_CACHE_MAX_RETRIES: &str = "EVENTOPS_CACHE_MAX_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }

    /// Retry policy with an optional per-call retry cap.
    pub fn retry_policy(&self, max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(max_retries.unwrap_or(self.max_retries), self.backoff())
    }

    /// Apply `EVENTOPS_CACHE_TTL_MS` and `EVENTOPS_CACHE_MAX_RETRIES`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_CACHE_TTL_MS).ok().as_deref(),
            std::env::var(ENV_CACHE_MAX_RETRIES).ok().as_deref(),
        )
    }

    /// Unparseable values are ignored. A TTL override must be positive.
    fn with_overrides(mut self, ttl_ms: Option<&str>, max_retries: Option<&str>) -> Self {
        if let Some(raw) = ttl_ms {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.default_ttl_ms = ms,
                _ => warn!(value = raw, "Ignoring invalid {}", ENV_CACHE_TTL_MS),
            }
        }
        if let Some(raw) = max_retries {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.max_retries = n,
                Err(_) => warn!(value = raw, "Ignoring invalid {}", ENV_CACHE_MAX_RETRIES),
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: None,
            cache: CacheConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let settings = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        Ok(settings.with_env_overrides())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        self.cache = self.cache.with_env_overrides();
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}
