//! Outbound API layer: everything between the reporting/tracking code and
//! the Matomo HTTP endpoints.
//!
//! - [`transport`]: the [`Transport`] seam and its `reqwest` implementation.
//! - [`client`]: [`MatomoClient`], one read call per `get` with timeout,
//!   cancellation, error classification, and optional validation.
//! - [`cancel`]: [`CancelToken`] and the timer-or-token [`CancelScope`].
//! - [`params`]: scalar parameter values and ordered query building.
//! - [`retry`]: the linear-backoff [`RetryPolicy`] used by tracking dispatch.

pub mod cancel;
pub mod client;
pub mod params;
pub mod retry;
pub mod transport;

pub use cancel::{CancelScope, CancelToken};
pub use client::{GetRequest, MatomoClient, ResponseValidator};
pub use params::{ParamValue, Params, Query};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, RawResponse, Transport, TransportFuture};
