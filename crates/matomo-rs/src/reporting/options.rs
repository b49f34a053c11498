//! Caller-facing query options and their translation into wire parameters.

use crate::api::params::{ParamValue, Params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on `filter_limit` for every paginated report.
pub const MAX_LIMIT: u32 = 1000;

/// Default page size for popular URLs and referrers.
pub const DEFAULT_LIMIT: u32 = 10;

/// Default page size for events.
pub const DEFAULT_EVENTS_LIMIT: u32 = 25;

/// Matomo reporting period.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
    Range,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Year,
        Period::Range,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Range => "range",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown period '{s}' (expected day, week, month, year, or range)"))
    }
}

/// Fields shared by every report query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Falls back to the service's default site id when `None`.
    pub site_id: Option<u32>,
    pub period: Period,
    /// Matomo date expression (`today`, `2024-01-31`, `last7`, ...).
    pub date: String,
    pub segment: Option<String>,
}

impl QueryOptions {
    pub fn new(period: Period, date: impl Into<String>) -> Self {
        Self {
            site_id: None,
            period,
            date: date.into(),
            segment: None,
        }
    }

    pub fn with_site(mut self, site_id: u32) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    /// Base wire parameters for an already-resolved site id.
    pub(crate) fn base_params(&self, site_id: u32) -> Params {
        let mut params = Params::new();
        params.insert("idSite".into(), site_id.into());
        params.insert("period".into(), self.period.as_str().into());
        params.insert("date".into(), self.date.as_str().into());
        if let Some(segment) = self.segment.as_deref().filter(|s| !s.is_empty()) {
            params.insert("segment".into(), segment.into());
        }
        params
    }
}

/// Requested page. Both fields are raw caller input and get normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PageRequest {
    pub limit: Option<f64>,
    pub page: Option<f64>,
}

impl PageRequest {
    pub fn new(limit: Option<f64>, page: Option<f64>) -> Self {
        Self { limit, page }
    }

    /// Normalize against a report kind's default page size.
    pub fn resolve(&self, default_limit: u32) -> Pagination {
        Pagination {
            page: normalize_page(self.page),
            limit: clamp_limit(self.limit, default_limit, MAX_LIMIT),
        }
    }
}

/// Effective page and page size used for a paginated report.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }

    pub(crate) fn apply(&self, params: &mut Params) {
        params.insert("filter_limit".into(), self.limit.into());
        params.insert("filter_offset".into(), ParamValue::from(self.offset()));
    }
}

/// Missing, non-finite, or sub-1 limits fall back to `fallback`; anything
/// above `max` is clamped; the rest is floored.
pub fn clamp_limit(limit: Option<f64>, fallback: u32, max: u32) -> u32 {
    match limit {
        Some(l) if l.is_finite() && l >= 1.0 => {
            if l > f64::from(max) {
                max
            } else {
                l.floor() as u32
            }
        }
        _ => fallback,
    }
}

/// Missing, non-finite, or negative pages become 0; the rest is floored.
pub fn normalize_page(page: Option<f64>) -> u32 {
    match page {
        Some(p) if p.is_finite() && p >= 0.0 => p.floor().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

/// Options for the most-popular-URLs report.
#[derive(Debug, Clone, PartialEq)]
pub struct PopularUrlsOptions {
    pub query: QueryOptions,
    pub page: PageRequest,
    /// Flatten the URL tree. Sent as `flat=1` unless explicitly `false`.
    pub flat: Option<bool>,
}

impl PopularUrlsOptions {
    pub fn new(query: QueryOptions) -> Self {
        Self {
            query,
            page: PageRequest::default(),
            flat: None,
        }
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn with_flat(mut self, flat: bool) -> Self {
        self.flat = Some(flat);
        self
    }
}

/// Options for the top-referrers report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferrersOptions {
    pub query: QueryOptions,
    pub page: PageRequest,
}

impl ReferrersOptions {
    pub fn new(query: QueryOptions) -> Self {
        Self {
            query,
            page: PageRequest::default(),
        }
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Options for the events report, with optional filters.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsOptions {
    pub query: QueryOptions,
    pub page: PageRequest,
    pub category: Option<String>,
    pub action: Option<String>,
    pub name: Option<String>,
}

impl EventsOptions {
    pub fn new(query: QueryOptions) -> Self {
        Self {
            query,
            page: PageRequest::default(),
            category: None,
            action: None,
            name: None,
        }
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Map present, non-empty filters onto their wire names.
    pub(crate) fn apply_filters(&self, params: &mut Params) {
        let filters = [
            ("eventCategory", &self.category),
            ("eventAction", &self.action),
            ("eventName", &self.name),
        ];
        for (wire, value) in filters {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                params.insert(wire.into(), v.into());
            }
        }
    }
}
