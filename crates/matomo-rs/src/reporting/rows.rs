//! Typed report rows.
//!
//! Rows are deserialized from payloads that already passed their
//! [`RowShape`](super::decode::RowShape) decoder, so every known numeric
//! field is a plain JSON number here. Fields this crate does not know about
//! land in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Visit summary metrics (`VisitsSummary.get`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyNumbersRow {
    pub nb_visits: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_uniq_visitors: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_users: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_pageviews: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_actions: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_visit_length: Option<f64>,
    /// Percentage, `45.5` for `"45.5%"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounce_rate: Option<f64>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_time_on_site: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Key numbers come back in one of three shapes depending on `period` and
/// `date`: a single row, a list of rows, or rows keyed by period label.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum KeyNumbers {
    Single(KeyNumbersRow),
    Series(Vec<KeyNumbersRow>),
    ByPeriod(BTreeMap<String, KeyNumbersRow>),
}

impl KeyNumbers {
    /// Total visits across every row.
    pub fn total_visits(&self) -> f64 {
        match self {
            KeyNumbers::Single(row) => row.nb_visits,
            KeyNumbers::Series(rows) => rows.iter().map(|r| r.nb_visits).sum(),
            KeyNumbers::ByPeriod(rows) => rows.values().map(|r| r.nb_visits).sum(),
        }
    }
}

/// One page URL row (`Actions.getPageUrls`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopularUrlRow {
    pub label: String,
    pub nb_hits: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_visits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_time_spent: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One referrer row (`Referrers.getAll`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReferrerRow {
    pub label: String,
    pub nb_visits: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_hits: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One event row (`Events.getAction`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventRow {
    pub label: String,
    pub nb_events: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_visits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_hits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_event_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_event_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_event_value: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_numbers_shapes() {
        let single: KeyNumbers =
            serde_json::from_value(json!({ "nb_visits": 5, "nb_actions": 9 })).unwrap();
        assert!(matches!(single, KeyNumbers::Single(_)));
        assert_eq!(single.total_visits(), 5.0);

        let series: KeyNumbers =
            serde_json::from_value(json!([{ "nb_visits": 1 }, { "nb_visits": 2 }])).unwrap();
        assert_eq!(series.total_visits(), 3.0);

        let by_period: KeyNumbers = serde_json::from_value(json!({
            "2024-01-01": { "nb_visits": 4 },
            "2024-01-02": { "nb_visits": 6 }
        }))
        .unwrap();
        assert!(matches!(by_period, KeyNumbers::ByPeriod(_)));
        assert_eq!(by_period.total_visits(), 10.0);
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = json!({
            "label": "/pricing",
            "nb_hits": 40,
            "url": "https://shop.example.com/pricing",
            "exit_rate": 12.5,
            "idsubdatatable": 3
        });
        let row: PopularUrlRow = serde_json::from_value(raw).unwrap();
        assert_eq!(row.nb_hits, 40.0);
        assert_eq!(row.extra["exit_rate"], 12.5);
        assert_eq!(row.extra["idsubdatatable"], 3);

        let back = serde_json::to_value(&row).unwrap();
        assert_eq!(back["label"], "/pricing");
        assert_eq!(back["idsubdatatable"], 3);
        assert!(back.get("nb_visits").is_none());
    }

    #[test]
    fn optional_null_reads_as_none() {
        let row: ReferrerRow = serde_json::from_value(json!({
            "label": "Search Engines",
            "nb_visits": 12,
            "nb_hits": null
        }))
        .unwrap();
        assert_eq!(row.nb_hits, None);
    }
}
