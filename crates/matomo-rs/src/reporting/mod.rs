//! Report orchestration over the outbound client and the cache.
//!
//! - [`options`]: caller-facing query options, pagination, and period.
//! - [`decode`]: per-kind row decoders with numeric normalization.
//! - [`rows`]: typed rows returned to callers.
//! - [`service`]: [`ReportingService`], one method per report kind.

pub mod decode;
pub mod options;
pub mod rows;
pub mod service;

pub use decode::RowShape;
pub use options::{
    EventsOptions, PageRequest, Pagination, Period, PopularUrlsOptions, QueryOptions,
    ReferrersOptions,
};
pub use rows::{EventRow, KeyNumbers, KeyNumbersRow, PopularUrlRow, ReferrerRow};
pub use service::{ReportResult, ReportingService};
