//! Raw records and source shapes
//!
//! Upstream sources hand over records as arbitrary JSON. Responses arrive
//! either as a bare array, as an envelope object holding the array under one
//! of a few well-known keys, or as a single record. `NormalizedSeriesSource`
//! resolves that shape once at the boundary so later stages only ever see a
//! list of `RawRecord`s.

use crate::calendar::parse_record_date;
use crate::error::ComputeError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Keys accepted as the record's date, in priority order
pub const DATE_KEYS: &[&str] = &[
    "date",
    "day",
    "calendarDate",
    "calendar_date",
    "summary_date",
    "start_date_local",
    "start_date",
    "startTime",
    "start_time",
    "start",
    "timestamp",
];

/// Keys carrying an activity category, as a string or list of strings
pub const CATEGORY_KEYS: &[&str] = &[
    "type",
    "activity_type",
    "activityType",
    "sport",
    "sport_type",
    "category",
    "activity_types",
    "categories",
];

/// Envelope keys that may wrap the record array
pub const ENVELOPE_KEYS: &[&str] = &["data", "rows", "items", "records", "activities", "results"];

/// One source's report for one timestamp or activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value; only objects are records
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Calendar day of the record, from the first date key that parses
    pub fn day(&self) -> Option<NaiveDate> {
        DATE_KEYS
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(parse_record_date)
    }

    /// Lowercased activity categories reported by the record
    pub fn categories(&self) -> BTreeSet<String> {
        let mut categories = BTreeSet::new();
        for key in CATEGORY_KEYS {
            match self.0.get(*key) {
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    categories.insert(s.trim().to_lowercase());
                }
                Some(Value::Array(items)) => {
                    categories.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|s| s.trim().to_lowercase())
                            .filter(|s| !s.is_empty()),
                    );
                }
                _ => {}
            }
        }
        categories
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Shape a source response arrived in
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedSeriesSource {
    /// Bare array of records
    Records(Vec<RawRecord>),
    /// Object wrapping the array under `key`
    Envelope { key: String, records: Vec<RawRecord> },
    /// A single record object
    Single(RawRecord),
    /// Null or empty response
    Empty,
}

impl NormalizedSeriesSource {
    /// Resolve a parsed response into a known shape.
    ///
    /// Array elements that are not objects are dropped.
    pub fn from_value(value: Value) -> Result<Self, ComputeError> {
        match value {
            Value::Null => Ok(Self::Empty),
            Value::Array(items) => Ok(Self::Records(collect_records(items))),
            Value::Object(mut map) => {
                let envelope = ENVELOPE_KEYS
                    .iter()
                    .find(|key| matches!(map.get(**key), Some(Value::Array(_))));
                match envelope {
                    Some(key) => {
                        let records = match map.remove(*key) {
                            Some(Value::Array(items)) => collect_records(items),
                            _ => Vec::new(),
                        };
                        Ok(Self::Envelope {
                            key: (*key).to_string(),
                            records,
                        })
                    }
                    None if map.is_empty() => Ok(Self::Empty),
                    None => Ok(Self::Single(RawRecord(map))),
                }
            }
            other => Err(ComputeError::ParseError(format!(
                "expected an array or object of records, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Parse a JSON response body
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn records(&self) -> &[RawRecord] {
        match self {
            Self::Records(records) | Self::Envelope { records, .. } => records,
            Self::Single(record) => std::slice::from_ref(record),
            Self::Empty => &[],
        }
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            Self::Records(records) | Self::Envelope { records, .. } => records,
            Self::Single(record) => vec![record],
            Self::Empty => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

fn collect_records(items: Vec<Value>) -> Vec<RawRecord> {
    items.into_iter().filter_map(RawRecord::from_value).collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_source_shapes() {
        let bare = NormalizedSeriesSource::from_value(json!([{"steps": 1}, 5, {"steps": 2}])).unwrap();
        assert!(matches!(bare, NormalizedSeriesSource::Records(_)));
        assert_eq!(bare.len(), 2);

        let wrapped =
            NormalizedSeriesSource::from_value(json!({"meta": {}, "rows": [{"steps": 1}]})).unwrap();
        match &wrapped {
            NormalizedSeriesSource::Envelope { key, records } => {
                assert_eq!(key, "rows");
                assert_eq!(records.len(), 1);
            }
            other => panic!("unexpected shape: {other:?}"),
        }

        let single = NormalizedSeriesSource::from_value(json!({"steps": 10})).unwrap();
        assert!(matches!(single, NormalizedSeriesSource::Single(_)));
        assert_eq!(single.into_records().len(), 1);

        assert_eq!(
            NormalizedSeriesSource::from_value(Value::Null).unwrap(),
            NormalizedSeriesSource::Empty
        );
        assert!(NormalizedSeriesSource::from_value(json!({})).unwrap().is_empty());
        assert!(NormalizedSeriesSource::from_value(json!("oops")).is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(NormalizedSeriesSource::from_json("not valid json").is_err());
        assert_eq!(
            NormalizedSeriesSource::from_json(r#"{"data": []}"#).unwrap().len(),
            0
        );
    }

    #[test]
    fn test_record_day_priority() {
        let r = record(json!({"start_date": "2024-01-10T07:00:00Z", "date": "2024-01-09"}));
        assert_eq!(r.day(), NaiveDate::from_ymd_opt(2024, 1, 9));

        let unparsable_first = record(json!({"date": "soon", "timestamp": 1705365000}));
        assert_eq!(unparsable_first.day(), NaiveDate::from_ymd_opt(2024, 1, 16));

        assert_eq!(record(json!({"steps": 5})).day(), None);
    }

    #[test]
    fn test_record_categories() {
        let r = record(json!({"type": " Walk ", "activity_types": ["RUN", "", 3]}));
        let categories: Vec<String> = r.categories().into_iter().collect();
        assert_eq!(categories, vec!["run".to_string(), "walk".to_string()]);
    }
}
