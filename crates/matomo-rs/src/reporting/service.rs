//! Reporting operations: one async method per report kind.
//!
//! Every operation runs the same pipeline: resolve the site id, build wire
//! params, derive the cache key, and on a miss fetch through
//! [`MatomoClient`] with the kind's decoder. Client errors are returned
//! unchanged; nothing here retries.

use super::decode::RowShape;
use super::options::{
    DEFAULT_EVENTS_LIMIT, DEFAULT_LIMIT, EventsOptions, Pagination, PopularUrlsOptions,
    QueryOptions, ReferrersOptions,
};
use super::rows::{EventRow, KeyNumbers, PopularUrlRow, ReferrerRow};
use crate::api::client::{GetRequest, MatomoClient};
use crate::api::params::Params;
use crate::cache::{CacheKey, CacheMetadata, ReportingCache};
use crate::error::{MatomoError, MatomoResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const METHOD_KEY_NUMBERS: &str = "VisitsSummary.get";
pub const METHOD_POPULAR_URLS: &str = "Actions.getPageUrls";
pub const METHOD_REFERRERS: &str = "Referrers.getAll";
pub const METHOD_EVENTS: &str = "Events.getAction";

/// Report data plus cache and pagination metadata.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReportResult<T> {
    pub data: T,
    pub cache: CacheMetadata,
    /// Present on paginated report kinds only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Report orchestrator bound to one client and one cache.
#[derive(Debug)]
pub struct ReportingService {
    client: Arc<MatomoClient>,
    cache: Mutex<ReportingCache>,
    default_site_id: Option<u32>,
}

impl ReportingService {
    pub fn new(client: Arc<MatomoClient>, cache: ReportingCache) -> Self {
        Self {
            client,
            cache: Mutex::new(cache),
            default_site_id: None,
        }
    }

    /// Site id used when a query does not name one.
    pub fn with_default_site_id(mut self, site_id: u32) -> Self {
        self.default_site_id = Some(site_id);
        self
    }

    pub fn client(&self) -> &MatomoClient {
        &self.client
    }

    /// Run `f` against the cache.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut ReportingCache) -> R) -> R {
        f(&mut self.lock_cache())
    }

    /// Visit summary for a period.
    pub async fn key_numbers(&self, query: &QueryOptions) -> MatomoResult<ReportResult<KeyNumbers>> {
        let params = self.base_params(query)?;
        self.fetch(METHOD_KEY_NUMBERS, params, RowShape::KeyNumbers, None)
            .await
    }

    /// Page URLs ranked by hits.
    pub async fn most_popular_urls(
        &self,
        options: &PopularUrlsOptions,
    ) -> MatomoResult<ReportResult<Vec<PopularUrlRow>>> {
        let mut params = self.base_params(&options.query)?;
        let pagination = options.page.resolve(DEFAULT_LIMIT);
        pagination.apply(&mut params);
        let flat: i64 = if options.flat == Some(false) { 0 } else { 1 };
        params.insert("flat".into(), flat.into());

        self.fetch(
            METHOD_POPULAR_URLS,
            params,
            RowShape::PopularUrls,
            Some(pagination),
        )
        .await
    }

    /// Referrers across every channel.
    pub async fn top_referrers(
        &self,
        options: &ReferrersOptions,
    ) -> MatomoResult<ReportResult<Vec<ReferrerRow>>> {
        let mut params = self.base_params(&options.query)?;
        let pagination = options.page.resolve(DEFAULT_LIMIT);
        pagination.apply(&mut params);

        self.fetch(METHOD_REFERRERS, params, RowShape::Referrers, Some(pagination))
            .await
    }

    /// Event actions, optionally filtered by category, action, or name.
    pub async fn events(&self, options: &EventsOptions) -> MatomoResult<ReportResult<Vec<EventRow>>> {
        let mut params = self.base_params(&options.query)?;
        let pagination = options.page.resolve(DEFAULT_EVENTS_LIMIT);
        pagination.apply(&mut params);
        options.apply_filters(&mut params);

        self.fetch(METHOD_EVENTS, params, RowShape::Events, Some(pagination))
            .await
    }

    fn base_params(&self, query: &QueryOptions) -> MatomoResult<Params> {
        let site_id = query
            .site_id
            .or(self.default_site_id)
            .ok_or_else(|| MatomoError::missing_field("siteId"))?;
        Ok(query.base_params(site_id))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Params,
        shape: RowShape,
        pagination: Option<Pagination>,
    ) -> MatomoResult<ReportResult<T>> {
        let key = CacheKey::new(method, &params);

        let lookup = self.lock_cache().get(&key);
        let (data, cache) = match lookup.value {
            Some(value) => (into_rows(method, value)?, lookup.metadata),
            None => {
                let value = self
                    .client
                    .get(
                        GetRequest::new(method)
                            .with_params(params)
                            .with_validator(&shape),
                    )
                    .await?;
                // Only payloads that convert to typed rows are stored.
                let data = into_rows(method, value.clone())?;
                let meta = self.lock_cache().set(key, value);
                debug!("{method}: stored in cache (ttl {}ms)", meta.ttl.as_millis());
                (data, meta)
            }
        };

        Ok(ReportResult {
            data,
            cache,
            pagination,
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, ReportingCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn into_rows<T: DeserializeOwned>(method: &str, value: Value) -> MatomoResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| {
        MatomoError::validation(format!("{method} rows could not be decoded: {e}"))
            .with_details(value)
            .with_cause(e)
    })
}
