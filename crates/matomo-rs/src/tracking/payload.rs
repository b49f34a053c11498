//! Tracking payload construction.
//!
//! A [`TrackingPayload`] is the form body of one tracking request. Building
//! it resolves the site id, so a payload that exists is always deliverable
//! and a missing site id never reaches the dispatch queue.

use crate::error::{ErrorKind, MatomoError, MatomoResult};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Format of the `cdt` field: UTC, second precision.
pub const CDT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Values shared by every payload built for one tracker.
#[derive(Clone, Default)]
pub struct TrackingDefaults {
    pub token_auth: String,
    pub default_site_id: Option<u32>,
}

impl std::fmt::Debug for TrackingDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingDefaults")
            .field("token_auth", &"[REDACTED]")
            .field("default_site_id", &self.default_site_id)
            .finish()
    }
}

impl TrackingDefaults {
    pub fn new(token_auth: impl Into<String>) -> Self {
        Self {
            token_auth: token_auth.into(),
            default_site_id: None,
        }
    }

    pub fn with_default_site_id(mut self, site_id: u32) -> Self {
        self.default_site_id = Some(site_id);
        self
    }
}

/// Visitor and timing fields common to every tracking call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitContext {
    /// Falls back to [`TrackingDefaults::default_site_id`].
    pub site_id: Option<u32>,
    /// User id (`uid`).
    pub uid: Option<String>,
    /// Pageview id (`pv_id`).
    pub pv_id: Option<String>,
    /// Event time, sent as `cdt`.
    pub ts: Option<DateTime<Utc>>,
}

impl VisitContext {
    pub fn with_site(mut self, site_id: u32) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_pv_id(mut self, pv_id: impl Into<String>) -> Self {
        self.pv_id = Some(pv_id.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts);
        self
    }
}

/// A page view.
#[derive(Debug, Clone, PartialEq)]
pub struct PageviewOptions {
    pub context: VisitContext,
    pub url: String,
    /// Page title, sent as `action_name`.
    pub title: Option<String>,
}

impl PageviewOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            context: VisitContext::default(),
            url: url.into(),
            title: None,
        }
    }

    pub fn with_context(mut self, context: VisitContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A custom event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOptions {
    pub context: VisitContext,
    pub category: String,
    pub action: String,
    pub name: Option<String>,
    pub value: Option<f64>,
}

impl EventOptions {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            context: VisitContext::default(),
            category: category.into(),
            action: action.into(),
            name: None,
            value: None,
        }
    }

    pub fn with_context(mut self, context: VisitContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// A goal conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalOptions {
    pub context: VisitContext,
    pub goal_id: u32,
    pub revenue: Option<f64>,
}

impl GoalOptions {
    pub fn new(goal_id: u32) -> Self {
        Self {
            context: VisitContext::default(),
            goal_id,
            revenue: None,
        }
    }

    pub fn with_context(mut self, context: VisitContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue);
        self
    }
}

/// Form fields of one tracking request, in insertion order.
#[derive(Clone, PartialEq)]
pub struct TrackingPayload {
    site_id: u32,
    fields: Vec<(String, String)>,
}

impl std::fmt::Debug for TrackingPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<_> = self
            .fields
            .iter()
            .map(|(k, v)| match k.as_str() {
                "token_auth" => (k.as_str(), "[REDACTED]"),
                _ => (k.as_str(), v.as_str()),
            })
            .collect();
        f.debug_struct("TrackingPayload")
            .field("site_id", &self.site_id)
            .field("fields", &fields)
            .finish()
    }
}

impl TrackingPayload {
    /// Start a payload with `idsite`, `token_auth`, `rec=1`, and whatever
    /// visitor fields the context carries.
    pub fn base(defaults: &TrackingDefaults, context: &VisitContext) -> MatomoResult<Self> {
        let site_id = context
            .site_id
            .or(defaults.default_site_id)
            .ok_or_else(|| {
                MatomoError::new(
                    ErrorKind::MissingRequiredField,
                    "siteId is required for tracking call",
                )
                .with_details(json!({ "field": "siteId" }))
            })?;

        let mut payload = Self {
            site_id,
            fields: Vec::with_capacity(8),
        };
        payload.push("idsite", site_id.to_string());
        payload.push("token_auth", defaults.token_auth.clone());
        payload.push("rec", "1");
        payload.push_opt("uid", context.uid.as_deref());
        payload.push_opt("pv_id", context.pv_id.as_deref());
        if let Some(ts) = context.ts {
            payload.push("cdt", format_cdt(ts));
        }
        Ok(payload)
    }

    pub fn pageview(defaults: &TrackingDefaults, options: &PageviewOptions) -> MatomoResult<Self> {
        let mut payload = Self::base(defaults, &options.context)?;
        payload.push("url", options.url.clone());
        payload.push_opt("action_name", options.title.as_deref());
        Ok(payload)
    }

    pub fn event(defaults: &TrackingDefaults, options: &EventOptions) -> MatomoResult<Self> {
        let mut payload = Self::base(defaults, &options.context)?;
        payload.push("e_c", options.category.clone());
        payload.push("e_a", options.action.clone());
        payload.push_opt("e_n", options.name.as_deref());
        if let Some(value) = options.value {
            payload.push("e_v", value.to_string());
        }
        Ok(payload)
    }

    pub fn goal(defaults: &TrackingDefaults, options: &GoalOptions) -> MatomoResult<Self> {
        let mut payload = Self::base(defaults, &options.context)?;
        payload.push("idgoal", options.goal_id.to_string());
        if let Some(revenue) = options.revenue {
            payload.push("revenue", revenue.to_string());
        }
        Ok(payload)
    }

    pub fn site_id(&self) -> u32 {
        self.site_id
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn push(&mut self, key: &str, value: impl Into<String>) {
        self.fields.push((key.to_string(), value.into()));
    }

    /// Empty strings are treated as absent.
    fn push_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.push(key, v);
        }
    }
}

/// Render a timestamp as Matomo's `cdt` string.
pub fn format_cdt(ts: DateTime<Utc>) -> String {
    ts.format(CDT_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn defaults() -> TrackingDefaults {
        TrackingDefaults::new("tok").with_default_site_id(3)
    }

    #[test]
    fn base_fields() {
        let ctx = VisitContext::default()
            .with_uid("user-42")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap());
        let payload = TrackingPayload::base(&defaults(), &ctx).unwrap();

        assert_eq!(payload.site_id(), 3);
        assert_eq!(payload.get("idsite"), Some("3"));
        assert_eq!(payload.get("token_auth"), Some("tok"));
        assert_eq!(payload.get("rec"), Some("1"));
        assert_eq!(payload.get("uid"), Some("user-42"));
        assert_eq!(payload.get("pv_id"), None);
        assert_eq!(payload.get("cdt"), Some("2024-03-09 07:05:01"));
    }

    #[test]
    fn explicit_site_overrides_default() {
        let ctx = VisitContext::default().with_site(11);
        let payload = TrackingPayload::base(&defaults(), &ctx).unwrap();
        assert_eq!(payload.get("idsite"), Some("11"));
    }

    #[test]
    fn missing_site_id_is_a_construction_failure() {
        let err = TrackingPayload::pageview(
            &TrackingDefaults::new("tok"),
            &PageviewOptions::new("https://shop.example.com/"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
        assert_eq!(err.message(), "siteId is required for tracking call");
    }

    #[test]
    fn call_kind_fields() {
        let pv = TrackingPayload::pageview(
            &defaults(),
            &PageviewOptions::new("https://shop.example.com/cart").with_title("Cart"),
        )
        .unwrap();
        assert_eq!(pv.get("url"), Some("https://shop.example.com/cart"));
        assert_eq!(pv.get("action_name"), Some("Cart"));

        let ev = TrackingPayload::event(
            &defaults(),
            &EventOptions::new("Video", "Play").with_value(4.5),
        )
        .unwrap();
        assert_eq!(ev.get("e_c"), Some("Video"));
        assert_eq!(ev.get("e_a"), Some("Play"));
        assert_eq!(ev.get("e_n"), None);
        assert_eq!(ev.get("e_v"), Some("4.5"));

        let goal = TrackingPayload::goal(&defaults(), &GoalOptions::new(2).with_revenue(19.0)).unwrap();
        assert_eq!(goal.get("idgoal"), Some("2"));
        assert_eq!(goal.get("revenue"), Some("19"));
    }

    #[test]
    fn debug_hides_token() {
        let payload = TrackingPayload::base(&defaults(), &VisitContext::default()).unwrap();
        let dbg = format!("{payload:?}");
        assert!(!dbg.contains("tok\""));
        assert!(dbg.contains("[REDACTED]"));
    }
}
