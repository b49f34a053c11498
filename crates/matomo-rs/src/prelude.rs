//! Convenience re-exports for common `matomo-rs` types.
//!
//! ```ignore
//! use matomo_rs::prelude::*;
//! ```
//!
//! Decoder internals and the cancellation scope are left out; import those
//! from their modules when needed.

// ── Errors and config ───────────────────────────────────────────────
pub use crate::config::{CacheConfig, ClientConfig, ConfigError, DispatchConfig, Settings};
pub use crate::error::{ErrorKind, MatomoError, MatomoResult};

// ── Outbound API ────────────────────────────────────────────────────
pub use crate::api::{
    CancelToken, GetRequest, HttpTransport, MatomoClient, ParamValue, Params, RawResponse,
    ResponseValidator, RetryPolicy, Transport,
};

// ── Reporting ───────────────────────────────────────────────────────
pub use crate::cache::{CacheMetadata, ReportingCache};
pub use crate::reporting::{
    EventRow, EventsOptions, KeyNumbers, KeyNumbersRow, PageRequest, Pagination, Period,
    PopularUrlRow, PopularUrlsOptions, QueryOptions, ReferrerRow, ReferrersOptions, ReportResult,
    ReportingService,
};

// ── Tracking ────────────────────────────────────────────────────────
pub use crate::tracking::{
    DispatchOutcome, DispatchQueue, EventOptions, GoalOptions, MatomoTracker, PageviewOptions,
    TrackingDefaults, VisitContext,
};
