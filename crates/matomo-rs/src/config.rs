//! Configuration for the client, cache, and dispatch queue.
//!
//! Each component has a plain config struct with sensible defaults and
//! `with_*` builder methods. [`Settings`] gathers the process-level values
//! (base URL, token, default site id, timeout) from the environment.
//!
//! ```ignore
//! let settings = Settings::from_env()?;
//! let client_config = settings.client_config().with_timeout(Duration::from_secs(5));
//! let dispatch = DispatchConfig::default().with_concurrency(4);
//! ```

use crate::api::params::{ParamValue, Params};
use crate::api::retry::RetryPolicy;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// Default path of the reporting API, relative to the base URL.
pub const DEFAULT_API_PATH: &str = "index.php";

/// Default path of the tracking endpoint, relative to the base URL.
pub const DEFAULT_TRACK_PATH: &str = "matomo.php";

/// Default cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default cache capacity.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 100;

/// Errors raised while building configuration or constructing components.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Matomo token must not be empty")]
    MissingToken,

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

// ── Client ─────────────────────────────────────────────────────────

/// Configuration for [`MatomoClient`](crate::api::client::MatomoClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Matomo installation root, e.g. `https://stats.example.com/`.
    pub base_url: String,
    /// `token_auth` sent with every call.
    pub token_auth: String,
    /// Reporting API path. Default: `index.php`.
    pub api_path: String,
    /// Parameters applied to every call before protocol and call params.
    pub default_params: Params,
    /// Default per-call timeout. `None` disables the internal timer.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token_auth: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_auth: token_auth.into(),
            api_path: DEFAULT_API_PATH.to_string(),
            default_params: Params::new(),
            timeout: None,
        }
    }

    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    pub fn with_default_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.base_url)
    }
}

// ── Cache ──────────────────────────────────────────────────────────

/// Configuration for [`ReportingCache`](crate::cache::ReportingCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entry lifetime. Default: 60 s.
    pub ttl: Duration,
    /// Maximum number of entries. Default: 100.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            max_size: DEFAULT_CACHE_MAX_SIZE,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// Configuration for [`DispatchQueue`](crate::tracking::queue::DispatchQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Tracking endpoint path. Default: `matomo.php`.
    pub track_path: String,
    /// Maximum deliveries in flight at once. Default: 1.
    pub concurrency: usize,
    /// Retry count and backoff.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            track_path: DEFAULT_TRACK_PATH.to_string(),
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_track_path(mut self, path: impl Into<String>) -> Self {
        self.track_path = path.into();
        self
    }
}

// ── Process settings ───────────────────────────────────────────────

/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `MATOMO_BASE_URL`
    pub base_url: String,
    /// `MATOMO_TOKEN`
    pub token_auth: String,
    /// `DEFAULT_SITE_ID`
    pub default_site_id: Option<u32>,
    /// `MATOMO_TIMEOUT_MS`
    pub timeout: Option<Duration>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = read("MATOMO_BASE_URL").ok_or(ConfigError::MissingVar("MATOMO_BASE_URL"))?;
        parse_base_url(&base_url)?;

        let token_auth = read("MATOMO_TOKEN").ok_or(ConfigError::MissingVar("MATOMO_TOKEN"))?;

        let default_site_id = read("DEFAULT_SITE_ID")
            .map(|v| parse_positive("DEFAULT_SITE_ID", &v).map(|n| n as u32))
            .transpose()?;

        let timeout = read("MATOMO_TIMEOUT_MS")
            .map(|v| parse_positive("MATOMO_TIMEOUT_MS", &v).map(Duration::from_millis))
            .transpose()?;

        Ok(Self {
            base_url,
            token_auth,
            default_site_id,
            timeout,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(&self.base_url, &self.token_auth);
        match self.timeout {
            Some(t) => config.with_timeout(t),
            None => config,
        }
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    };
    let n: u64 = value.trim().parse().map_err(|_| invalid())?;
    if n == 0 || (var == "DEFAULT_SITE_ID" && n > u64::from(u32::MAX)) {
        return Err(invalid());
    }
    Ok(n)
}
