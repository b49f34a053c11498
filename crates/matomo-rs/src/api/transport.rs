//! The network seam between the client/dispatch queue and Matomo.
//!
//! [`Transport`] issues exactly one request and reports the raw status and
//! body. Classification of that response (HTTP error, Matomo error, shape
//! validation) happens in the callers. [`HttpTransport`] is the `reqwest`
//! implementation; tests substitute scripted transports.

use crate::config::ConfigError;
use crate::error::{MatomoError, MatomoResult};
use reqwest::Url;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default whole-request timeout applied by [`HttpTransport`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = MatomoResult<RawResponse>> + Send + 'a>>;

/// Issues single HTTP exchanges. Implementations must not retry.
///
/// Errors returned here are low-level delivery failures and should carry
/// [`ErrorKind::TransportError`](crate::error::ErrorKind::TransportError).
pub trait Transport: Send + Sync {
    /// GET `url` with `query` appended as the URL query string.
    fn get<'a>(&'a self, url: &'a Url, query: &'a [(String, String)]) -> TransportFuture<'a>;

    /// POST `form` to `url` as `application/x-www-form-urlencoded`.
    fn post_form<'a>(&'a self, url: &'a Url, form: &'a [(String, String)]) -> TransportFuture<'a>;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> MatomoResult<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> MatomoResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("matomo-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| MatomoError::transport("failed to build HTTP client").with_cause(e))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared connection pool, custom TLS, ...).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn finish(
        request: reqwest::RequestBuilder,
        method: &'static str,
        url: &Url,
    ) -> MatomoResult<RawResponse> {
        let start = Instant::now();
        let resp = request
            .send()
            .await
            .map_err(|e| request_error(e, "Matomo request failed"))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| request_error(e, "failed to read Matomo response"))?;

        debug!(
            "{method} {} -> HTTP {status} in {:.0}ms ({} bytes)",
            url.path(),
            start.elapsed().as_secs_f64() * 1000.0,
            body.len()
        );
        Ok(RawResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a Url, query: &'a [(String, String)]) -> TransportFuture<'a> {
        Box::pin(async move {
            trace!("GET {} with {} query parameter(s)", url.path(), query.len());
            let request = self
                .client
                .get(url.clone())
                .header("accept", "application/json")
                .query(query);
            Self::finish(request, "GET", url).await
        })
    }

    fn post_form<'a>(&'a self, url: &'a Url, form: &'a [(String, String)]) -> TransportFuture<'a> {
        Box::pin(async move {
            trace!("POST {} with {} form field(s)", url.path(), form.len());
            let request = self.client.post(url.clone()).form(form);
            Self::finish(request, "POST", url).await
        })
    }
}

/// The client's own request timer firing is a `timeout`; anything else is a
/// delivery failure.
fn request_error(err: reqwest::Error, message: &str) -> MatomoError {
    let mapped = if err.is_timeout() {
        MatomoError::timeout("Matomo request timed out")
    } else {
        MatomoError::transport(message)
    };
    mapped.with_cause(err)
}

/// Join `path` onto `base`, treating `base` as a directory.
pub(crate) fn join_url(base: &Url, path: &str) -> Result<Url, ConfigError> {
    // `Url::join` replaces the last segment unless the base ends in '/'.
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path).map_err(|e| ConfigError::InvalidBaseUrl {
        url: format!("{base}{path}"),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        assert!(RawResponse::new(200, "").is_success());
        assert!(RawResponse::new(204, "").is_success());
        assert!(!RawResponse::new(302, "").is_success());
        assert!(!RawResponse::new(500, "").is_success());
    }

    #[test]
    fn join_treats_base_as_directory() {
        let base = Url::parse("https://stats.example.com/matomo").unwrap();
        let url = join_url(&base, "index.php").unwrap();
        assert_eq!(url.as_str(), "https://stats.example.com/matomo/index.php");

        let base = Url::parse("https://stats.example.com/").unwrap();
        let url = join_url(&base, "matomo.php").unwrap();
        assert_eq!(url.as_str(), "https://stats.example.com/matomo.php");
    }

    #[test]
    fn unjoinable_path_is_a_config_error() {
        let base = Url::parse("https://stats.example.com/").unwrap();
        let err = join_url(&base, "http://[::1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }), "{err:?}");
    }
}
