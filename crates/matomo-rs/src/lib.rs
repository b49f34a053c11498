//! Async client for the [Matomo](https://matomo.org/) analytics API.
//!
//! `matomo-rs` covers both sides of a Matomo installation: cached reads of
//! the reporting API (`index.php?module=API`) and queued, retrying writes to
//! the tracking endpoint (`matomo.php`). Every operation returns a typed
//! [`MatomoError`] on failure, so callers can map failures onto their own
//! transport without this crate knowing about it.
//!
//! # Getting started
//!
//! ```ignore
//! use matomo_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env()?;
//!     let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
//!
//!     let client = MatomoClient::new(&settings.client_config(), transport.clone())?;
//!     let reports = ReportingService::new(Arc::new(client), ReportingCache::default())
//!         .with_default_site_id(1);
//!
//!     let urls = reports
//!         .most_popular_urls(&PopularUrlsOptions::new(QueryOptions::new(Period::Day, "today")))
//!         .await?;
//!     println!("{} rows (cache hit: {})", urls.data.len(), urls.cache.hit);
//!
//!     let tracker = MatomoTracker::new(
//!         &settings.base_url,
//!         TrackingDefaults::new(&settings.token_auth).with_default_site_id(1),
//!         &DispatchConfig::default(),
//!         transport,
//!     )?;
//!     tracker.track_event(EventOptions::new("Video", "Play")).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Issue a raw API call:** [`MatomoClient::get`](api::client::MatomoClient::get)
//!   with a [`GetRequest`](api::client::GetRequest). Attach a
//!   [`CancelToken`](api::cancel::CancelToken) or a per-call timeout, and
//!   optionally a [`ResponseValidator`](api::client::ResponseValidator).
//!
//! - **Read reports:** [`ReportingService`](reporting::ReportingService) has
//!   one method per report kind (key numbers, popular URLs, referrers,
//!   events). Results carry [`CacheMetadata`](cache::CacheMetadata) and, for
//!   paginated kinds, the effective [`Pagination`](reporting::Pagination).
//!
//! - **Send tracking calls:** [`MatomoTracker`](tracking::MatomoTracker)
//!   builds payloads and awaits their delivery through a
//!   [`DispatchQueue`](tracking::DispatchQueue).
//!
//! - **Swap the network:** implement [`Transport`](api::transport::Transport).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Transport seam, outbound client, cancellation, params, retry policy |
//! | [`cache`] | TTL + bounded cache keyed by canonical `(method, params)` |
//! | [`reporting`] | Query options, row decoders, typed rows, reporting service |
//! | [`tracking`] | Tracking payloads, dispatch queue, tracker facade |
//! | [`config`] | Component configs and environment settings |
//! | [`error`] | [`MatomoError`] and [`ErrorKind`] |

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod prelude;
pub mod reporting;
pub mod tracking;

pub use error::{ErrorKind, MatomoError, MatomoResult};
