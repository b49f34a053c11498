//! Outbound client for Matomo's reporting API.
//!
//! [`MatomoClient::get`] issues one GET against `index.php`, bounded by a
//! [`CancelScope`] built from the request timeout and the caller's token.
//! The response is classified in a fixed order:
//!
//! 1. non-2xx status → `transport_error` (status and body in details)
//! 2. `{"result": "error"}` payload → `remote_error` with Matomo's message
//! 3. validator rejection → `validation_error` (raw payload in details)
//!
//! There are no retries at this layer.

use crate::api::cancel::{AbortReason, CancelScope, CancelToken};
use crate::api::params::{ParamValue, Params, Query};
use crate::api::transport::{RawResponse, Transport, join_url};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{MatomoError, MatomoResult};
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Wire format requested from Matomo.
pub const RESPONSE_FORMAT: &str = "json";

/// Checks (and may normalize) a parsed response before it reaches the caller.
///
/// Returning `Err` yields a `validation_error` whose details hold the
/// original parsed payload.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, raw: &Value) -> Result<Value, String>;
}

impl<F> ResponseValidator for F
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    fn validate(&self, raw: &Value) -> Result<Value, String> {
        self(raw)
    }
}

/// One read call: method name, parameters, and per-call overrides.
pub struct GetRequest<'a> {
    pub method: String,
    pub params: Params,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub validator: Option<&'a dyn ResponseValidator>,
}

impl<'a> GetRequest<'a> {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Params::new(),
            timeout: None,
            cancel: None,
            validator: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_validator(mut self, validator: &'a dyn ResponseValidator) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// Async client for Matomo's `module=API` endpoint.
pub struct MatomoClient {
    transport: Arc<dyn Transport>,
    api_url: Url,
    token_auth: String,
    default_params: Params,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for MatomoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatomoClient")
            .field("api_url", &self.api_url.as_str())
            .field("token_auth", &"[REDACTED]")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl MatomoClient {
    /// Create a client that sends through `transport`.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let base = config.parsed_base_url()?;
        if config.token_auth.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(Self {
            transport,
            api_url: join_url(&base, &config.api_path)?,
            token_auth: config.token_auth.clone(),
            default_params: config.default_params.clone(),
            default_timeout: config.timeout,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Merge default params, protocol params, the method, then call params.
    /// Later sources overwrite earlier ones key by key.
    pub fn build_query(&self, method: &str, params: &Params) -> MatomoResult<Query> {
        let mut query = Query::new();
        query.extend_params(&self.default_params);
        query.set("module", "API");
        query.set("format", RESPONSE_FORMAT);
        query.set("token_auth", self.token_auth.as_str());

        if method.is_empty() {
            return Err(MatomoError::remote("Matomo method is required"));
        }
        query.set("method", method);
        query.extend_params(params);
        Ok(query)
    }

    /// Issue one read call and classify the outcome.
    pub async fn get(&self, request: GetRequest<'_>) -> MatomoResult<Value> {
        let query = self.build_query(&request.method, &request.params)?;
        let timeout = request.timeout.or(self.default_timeout);
        let scope = CancelScope::new(timeout, request.cancel.clone());

        debug!(
            "Matomo request: method={}, params={}, timeout={:?}",
            request.method,
            request.params.len(),
            timeout
        );
        let start = Instant::now();

        let raw = match scope
            .run(self.transport.get(&self.api_url, query.pairs()))
            .await
        {
            Ok(result) => result?,
            Err(AbortReason::TimedOut(_)) => {
                return Err(MatomoError::timeout("Matomo request timed out")
                    .with_details(serde_json::json!({ "method": request.method })));
            }
            Err(AbortReason::External(reason)) => {
                return Err(MatomoError::transport(reason.clone())
                    .with_details(serde_json::json!({
                        "method": request.method,
                        "cancelled": true,
                    }))
                    .with_cause(reason));
            }
        };

        debug!(
            "Matomo response: method={}, HTTP {} in {:.1}s ({} bytes)",
            request.method,
            raw.status,
            start.elapsed().as_secs_f64(),
            raw.body.len()
        );

        classify(raw, request.validator)
    }
}

/// Parse a body as JSON when possible; empty bodies become `null` and
/// anything unparseable is kept as a string.
pub fn parse_body(body: &str) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

fn classify(raw: RawResponse, validator: Option<&dyn ResponseValidator>) -> MatomoResult<Value> {
    let data = parse_body(&raw.body);

    if !raw.is_success() {
        let details = if data.is_null() {
            Value::String(raw.body)
        } else {
            data
        };
        return Err(
            MatomoError::transport(format!("Matomo HTTP error: {}", raw.status))
                .with_status(raw.status)
                .with_details(details),
        );
    }

    if let Some(message) = remote_error_message(&data) {
        return Err(
            MatomoError::remote(format!("Matomo API error: {message}")).with_details(data),
        );
    }

    match validator {
        Some(v) => v.validate(&data).map_err(|issue| {
            MatomoError::validation(format!("Matomo response validation failed: {issue}"))
                .with_details(data)
        }),
        None => Ok(data),
    }
}

/// Matomo reports application errors in-band with a 200 status.
fn remote_error_message(data: &Value) -> Option<String> {
    let obj = data.as_object()?;
    if obj.get("result").and_then(Value::as_str) != Some("error") {
        return None;
    }
    Some(
        obj.get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Matomo error")
            .to_string(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::transport::TransportFuture;
    use crate::error::ErrorKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays scripted responses and records every query.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub responses: Mutex<VecDeque<MatomoResult<RawResponse>>>,
        pub queries: Mutex<Vec<Vec<(String, String)>>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub fn replying(responses: Vec<MatomoResult<RawResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }

        pub fn last_query(&self) -> Vec<(String, String)> {
            self.queries.lock().unwrap().last().cloned().unwrap_or_default()
        }

        fn next(&self, pairs: &[(String, String)]) -> MatomoResult<RawResponse> {
            self.queries.lock().unwrap().push(pairs.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(200, "null")))
        }
    }

    impl Transport for ScriptedTransport {
        fn get<'a>(&'a self, _url: &'a Url, query: &'a [(String, String)]) -> TransportFuture<'a> {
            Box::pin(async move {
                if let Some(d) = self.delay {
                    tokio::time::sleep(d).await;
                }
                self.next(query)
            })
        }

        fn post_form<'a>(&'a self, _url: &'a Url, form: &'a [(String, String)]) -> TransportFuture<'a> {
            Box::pin(async move { self.next(form) })
        }
    }

    pub(crate) fn config() -> ClientConfig {
        ClientConfig::new("https://matomo.example.com/", "secret-token")
    }

    fn client_with(transport: Arc<ScriptedTransport>) -> MatomoClient {
        MatomoClient::new(&config(), transport).unwrap()
    }

    fn value_of<'q>(query: &'q [(String, String)], key: &str) -> Option<&'q str> {
        query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn query_merge_order() {
        let mut cfg = config();
        cfg.default_params.insert("format".into(), "xml".into());
        cfg.default_params.insert("language".into(), "de".into());
        let client = MatomoClient::new(&cfg, Arc::new(ScriptedTransport::default())).unwrap();

        let mut params = Params::new();
        params.insert("idSite".into(), 1u32.into());
        params.insert("language".into(), "en".into());
        let query = client.build_query("VisitsSummary.get", &params).unwrap();

        assert_eq!(query.get("format"), Some("json"));
        assert_eq!(query.get("module"), Some("API"));
        assert_eq!(query.get("token_auth"), Some("secret-token"));
        assert_eq!(query.get("method"), Some("VisitsSummary.get"));
        assert_eq!(query.get("language"), Some("en"));
        assert_eq!(query.get("idSite"), Some("1"));
    }

    #[test]
    fn unusable_api_path_is_rejected() {
        let cfg = config().with_api_path("http://[::1");
        let err = MatomoClient::new(&cfg, Arc::new(ScriptedTransport::default())).err();
        assert!(matches!(err, Some(ConfigError::InvalidBaseUrl { .. })), "{err:?}");
    }

    #[tokio::test]
    async fn missing_method_fails_before_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(transport.clone());

        let err = client.get(GetRequest::new("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteError);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn returns_parsed_json() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Ok(RawResponse::new(
            200,
            r#"{"nb_visits": 12}"#,
        ))]));
        let client = client_with(transport.clone());

        let value = client
            .get(GetRequest::new("VisitsSummary.get").with_param("idSite", 3u32))
            .await
            .unwrap();
        assert_eq!(value["nb_visits"], 12);
        assert_eq!(value_of(&transport.last_query(), "idSite"), Some("3"));
    }

    #[tokio::test]
    async fn http_status_is_transport_error() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Ok(RawResponse::new(
            503,
            "maintenance",
        ))]));
        let client = client_with(transport);

        let err = client.get(GetRequest::new("API.getMatomoVersion")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.details(), Some(&Value::String("maintenance".into())));
    }

    #[tokio::test]
    async fn in_band_error_is_remote_error() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Ok(RawResponse::new(
            200,
            r#"{"result":"error","message":"You can't access this resource"}"#,
        ))]));
        let client = client_with(transport);

        let err = client.get(GetRequest::new("VisitsSummary.get")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteError);
        assert!(err.message().contains("You can't access this resource"));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn validator_failure_keeps_raw_payload() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Ok(RawResponse::new(
            200,
            r#"{"unexpected": true}"#,
        ))]));
        let client = client_with(transport);
        let reject = |_: &Value| -> Result<Value, String> { Err("nb_visits missing".into()) };

        let err = client
            .get(GetRequest::new("VisitsSummary.get").with_validator(&reject))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.details().unwrap()["unexpected"], true);
    }

    #[tokio::test]
    async fn non_json_body_is_text() {
        let transport = Arc::new(ScriptedTransport::replying(vec![
            Ok(RawResponse::new(200, "plain text")),
            Ok(RawResponse::new(200, "")),
        ]));
        let client = client_with(transport);

        let text = client.get(GetRequest::new("API.get")).await.unwrap();
        assert_eq!(text, Value::String("plain text".into()));
        let empty = client.get(GetRequest::new("API.get")).await.unwrap();
        assert!(empty.is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_response_times_out() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let client = client_with(transport);

        let err = client
            .get(GetRequest::new("VisitsSummary.get").with_timeout(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.details().unwrap()["method"], "VisitsSummary.get");
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancel_propagates_reason() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let client = client_with(transport);
        let token = CancelToken::new();
        token.cancel("client disconnected");

        let err = client
            .get(
                GetRequest::new("VisitsSummary.get")
                    .with_timeout(Duration::from_secs(5))
                    .with_cancel_token(token),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.message(), "client disconnected");
    }

    #[tokio::test]
    async fn transport_failure_passes_through() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Err(
            MatomoError::transport("Matomo request failed"),
        )]));
        let client = client_with(transport);

        let err = client.get(GetRequest::new("API.get")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn debug_redacts_token() {
        let client = client_with(Arc::new(ScriptedTransport::default()));
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("index.php"));
    }
}
