//! Row decoders for Matomo report payloads.
//!
//! Matomo is inconsistent about numbers: the same metric can arrive as
//! `12`, `"12"`, `"1,234"`, `"45.5%"`, or a duration like `"0:03:17"`.
//! Each [`RowShape`] knows which fields of its row kind are numeric and
//! which are strings; decoding rewrites numeric fields to JSON numbers and
//! leaves every other field untouched.

use crate::api::client::ResponseValidator;
use serde_json::{Map, Value};

/// A numeric field of a row and whether it must be present.
struct NumericField {
    name: &'static str,
    required: bool,
}

const fn required(name: &'static str) -> NumericField {
    NumericField {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> NumericField {
    NumericField {
        name,
        required: false,
    }
}

/// A string field of a row and whether it must be present.
struct TextField {
    name: &'static str,
    required: bool,
}

const KEY_NUMBERS_NUMERIC: &[NumericField] = &[
    required("nb_visits"),
    optional("nb_uniq_visitors"),
    optional("nb_users"),
    optional("nb_pageviews"),
    optional("nb_actions"),
    optional("nb_visits_converted"),
    optional("max_actions"),
    optional("sum_visit_length"),
    optional("bounce_count"),
    optional("bounce_rate"),
    optional("nb_actions_per_visit"),
    optional("avg_time_on_site"),
];

const POPULAR_URL_NUMERIC: &[NumericField] = &[
    required("nb_hits"),
    optional("nb_visits"),
    optional("sum_time_spent"),
    optional("avg_time_on_page"),
    optional("bounce_rate"),
    optional("exit_rate"),
];

const REFERRER_NUMERIC: &[NumericField] = &[
    required("nb_visits"),
    optional("nb_hits"),
    optional("nb_uniq_visitors"),
    optional("nb_actions"),
    optional("bounce_rate"),
];

const EVENT_NUMERIC: &[NumericField] = &[
    required("nb_events"),
    optional("nb_visits"),
    optional("nb_hits"),
    optional("sum_event_value"),
    optional("max_event_value"),
    optional("min_event_value"),
    optional("avg_event_value"),
];

const LABEL_AND_URL: &[TextField] = &[
    TextField {
        name: "label",
        required: true,
    },
    TextField {
        name: "url",
        required: false,
    },
];

const REFERRER_TEXT: &[TextField] = &[
    TextField {
        name: "label",
        required: true,
    },
    TextField {
        name: "url",
        required: false,
    },
    TextField {
        name: "referrer_type",
        required: false,
    },
];

const LABEL_ONLY: &[TextField] = &[TextField {
    name: "label",
    required: true,
}];

/// Row kind of a report; one decoder per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// `VisitsSummary.get`: a single row, an array of rows, or a map of
    /// period label to row.
    KeyNumbers,
    /// `Actions.getPageUrls`: array of URL rows.
    PopularUrls,
    /// `Referrers.getAll`: array of referrer rows.
    Referrers,
    /// `Events.getAction`: array of event rows.
    Events,
}

impl RowShape {
    fn numeric_fields(self) -> &'static [NumericField] {
        match self {
            RowShape::KeyNumbers => KEY_NUMBERS_NUMERIC,
            RowShape::PopularUrls => POPULAR_URL_NUMERIC,
            RowShape::Referrers => REFERRER_NUMERIC,
            RowShape::Events => EVENT_NUMERIC,
        }
    }

    fn text_fields(self) -> &'static [TextField] {
        match self {
            RowShape::KeyNumbers => &[],
            RowShape::PopularUrls => LABEL_AND_URL,
            RowShape::Referrers => REFERRER_TEXT,
            RowShape::Events => LABEL_ONLY,
        }
    }

    /// Decode a whole payload of this kind.
    pub fn decode(self, raw: &Value) -> Result<Value, String> {
        match self {
            RowShape::KeyNumbers => self.decode_key_numbers(raw),
            _ => self.decode_rows(raw, ""),
        }
    }

    fn decode_key_numbers(self, raw: &Value) -> Result<Value, String> {
        match raw {
            Value::Object(obj) if obj.contains_key("nb_visits") => {
                self.decode_row(raw, "").map(Value::Object)
            }
            Value::Array(_) => self.decode_rows(raw, ""),
            Value::Object(obj) => {
                let mut out = Map::with_capacity(obj.len());
                for (period, row) in obj {
                    let decoded = self.decode_row(row, &format!("{period}."))?;
                    out.insert(period.clone(), Value::Object(decoded));
                }
                Ok(Value::Object(out))
            }
            other => Err(format!("expected object or array, got {}", type_name(other))),
        }
    }

    fn decode_rows(self, raw: &Value, path: &str) -> Result<Value, String> {
        let rows = raw
            .as_array()
            .ok_or_else(|| format!("{path}expected array of rows, got {}", type_name(raw)))?;
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                self.decode_row(row, &format!("{path}[{i}]."))
                    .map(Value::Object)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    /// Decode one row. Unknown fields are preserved as-is.
    fn decode_row(self, row: &Value, path: &str) -> Result<Map<String, Value>, String> {
        let obj = row
            .as_object()
            .ok_or_else(|| format!("{path}expected row object, got {}", type_name(row)))?;
        let mut out = obj.clone();

        for field in self.text_fields() {
            match obj.get(field.name) {
                Some(Value::String(_)) => {}
                None | Some(Value::Null) if !field.required => {}
                None => return Err(format!("{path}{}: required", field.name)),
                Some(other) => {
                    return Err(format!(
                        "{path}{}: expected string, got {}",
                        field.name,
                        type_name(other)
                    ));
                }
            }
        }

        for field in self.numeric_fields() {
            match obj.get(field.name) {
                None | Some(Value::Null) if !field.required => {}
                None => return Err(format!("{path}{}: required", field.name)),
                Some(value) => {
                    let n = decode_number(value)
                        .map_err(|issue| format!("{path}{}: {issue}", field.name))?;
                    out.insert(field.name.to_string(), number_value(n));
                }
            }
        }

        Ok(out)
    }
}

impl ResponseValidator for RowShape {
    fn validate(&self, raw: &Value) -> Result<Value, String> {
        self.decode(raw)
    }
}

/// Decode a JSON value that should hold a finite number.
pub fn decode_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| format!("number {n} is not finite")),
        Value::String(s) => normalize_numeric(s),
        other => Err(format!("expected number, got {}", type_name(other))),
    }
}

/// Normalize Matomo's string-encoded numbers.
///
/// - `H:MM:SS` / `MM:SS` durations become total seconds.
/// - A trailing `%` is dropped and thousands separators are removed.
pub fn normalize_numeric(raw: &str) -> Result<f64, String> {
    let s = raw.trim();
    if s.contains(':') {
        return parse_duration(s).ok_or_else(|| format!("invalid duration '{raw}'"));
    }

    let stripped = s.strip_suffix('%').unwrap_or(s).trim_end();
    let cleaned: String = stripped.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Err(format!("'{raw}' is not a number"));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("'{raw}' is not a number"))
}

fn parse_duration(s: &str) -> Option<f64> {
    let parts: Vec<u64> = s
        .split(':')
        .map(|seg| {
            let seg = seg.trim();
            if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                seg.parse().ok()
            }
        })
        .collect::<Option<_>>()?;

    let seconds = match parts.as_slice() {
        [h, m, s] => h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s)?,
        [m, s] => m.checked_mul(60)?.checked_add(*s)?,
        _ => return None,
    };
    Some(seconds as f64)
}

/// Integral values become JSON integers so they round-trip cleanly.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
