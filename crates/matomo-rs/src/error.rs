//! Typed errors for every Matomo operation.
//!
//! All fallible calls return [`MatomoResult`]. The [`ErrorKind`] tells a
//! caller which of the six failure classes occurred; `status`, `details`,
//! and the wrapped source carry enough context to build a transport-specific
//! response without this crate knowing about that transport.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Boxed error used as the wrapped cause of a [`MatomoError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure class of a [`MatomoError`].
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The internal request timer fired before the call completed.
    Timeout,
    /// Non-success HTTP status, low-level delivery failure, or an external
    /// cancellation.
    TransportError,
    /// Matomo answered with `"result": "error"`, or the request could not be
    /// formed (missing method).
    RemoteError,
    /// The response shape or a numeric field failed to decode.
    ValidationError,
    /// A required identifier was absent and no default was configured.
    MissingRequiredField,
    /// Every delivery attempt of a tracking call failed.
    DispatchExhausted,
}

impl ErrorKind {
    /// Stable snake_case code, suitable for wire responses.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::RemoteError => "remote_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::DispatchExhausted => "dispatch_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned by the client, cache-backed reporting, and tracking dispatch.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct MatomoError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    details: Option<serde_json::Value>,
    #[source]
    cause: Option<BoxError>,
}

/// Result type alias using [`MatomoError`].
pub type MatomoResult<T> = Result<T, MatomoError>;

impl MatomoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: None,
            cause: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorKind::MissingRequiredField,
            format!("{field} is required"),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    /// Wrap the last delivery failure after `attempts` tries.
    pub fn dispatch_exhausted(attempts: u32, last: MatomoError) -> Self {
        let status = last.status;
        Self::new(
            ErrorKind::DispatchExhausted,
            format!("tracking call failed after {attempts} attempt(s)"),
        )
        .with_details(serde_json::json!({
            "attempts": attempts,
            "last_error": last.kind.code(),
        }))
        .with_status_opt(status)
        .with_cause(last)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn with_status_opt(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// The wrapped cause, when it is itself a [`MatomoError`].
    pub fn inner(&self) -> Option<&MatomoError> {
        self.cause.as_deref()?.downcast_ref::<MatomoError>()
    }
}
