//! Field normalization
//!
//! This module extracts canonical field values from raw source records.
//! - Candidate keys from the versioned field table, in priority order
//! - Depth-bounded structural fallback, logged so schema drift is visible
//! - Numeric coercion that tolerates separators and unit suffixes
//! - Unit conversion (meters → km, seconds → minutes, timestamps → clock time)
//!
//! A field that cannot be found or coerced is `None`, never an error.

use crate::circular::minutes_of_day;
use crate::schema::{
    fold_key, FieldSpec, RawRecord, SourceUnit, UnitRule, FIELD_TABLE_VERSION, MAX_FALLBACK_DEPTH,
};
use crate::types::{CanonicalDailyMetric, FieldId, SourceRole};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Numbers at or above this are epoch timestamps when a clock time is expected
const EPOCH_SECONDS_FLOOR: f64 = 1e9;

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Normalizer for extracting canonical field values from raw records
pub struct FieldNormalizer;

impl FieldNormalizer {
    /// Extract the canonical value of a field from a record
    pub fn normalize(record: &RawRecord, field: FieldId) -> Option<f64> {
        let spec = field.spec();

        // Present-but-malformed candidates are skipped like missing ones
        let direct = spec.aliases.iter().find_map(|alias| {
            record
                .get(alias.key)
                .and_then(|value| coerce_field_value(value, spec.unit, alias.unit))
        });
        if direct.is_some() {
            return direct;
        }

        let (path, value) = search_map(record.fields(), spec, 1, "")?;
        warn!(
            field = %field,
            path = %path,
            table = FIELD_TABLE_VERSION,
            "field resolved by structural fallback"
        );
        Some(value)
    }

    /// Normalize records into one canonical metric per calendar day.
    ///
    /// Records sharing a day are combined per field (sums for additive
    /// fields, means for levels, circular means for clock times). Records
    /// without a recognizable date are skipped.
    pub fn daily_metrics<'a, I>(
        records: I,
        fields: &[FieldId],
        source: SourceRole,
    ) -> Vec<CanonicalDailyMetric>
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        let fields = FieldId::distinct(fields);
        let mut by_day: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
        let mut seen = 0usize;
        let mut undated = 0usize;

        for record in records {
            seen += 1;
            let Some(day) = record.day() else {
                undated += 1;
                continue;
            };

            let accumulator = by_day.entry(day).or_default();
            accumulator.categories.extend(record.categories());
            for &field in &fields {
                if let Some(value) = Self::normalize(record, field) {
                    accumulator.values.entry(field).or_default().push(value);
                }
            }
        }

        if undated > 0 {
            warn!(undated, source = ?source, "skipped records without a recognizable date");
        }
        debug!(
            records = seen,
            days = by_day.len(),
            source = ?source,
            "normalized records into daily metrics"
        );

        by_day
            .into_iter()
            .map(|(day, accumulator)| accumulator.into_metric(day, source, &fields))
            .collect()
    }
}

/// Accumulator for the records of a single day
#[derive(Default)]
struct DayAccumulator {
    categories: BTreeSet<String>,
    values: BTreeMap<FieldId, Vec<f64>>,
}

impl DayAccumulator {
    fn into_metric(self, day: NaiveDate, source: SourceRole, fields: &[FieldId]) -> CanonicalDailyMetric {
        let mut metric = CanonicalDailyMetric::new(day, source);
        metric.categories = self.categories;
        for &field in fields {
            let combined = self.values.get(&field).and_then(|values| field.combine(values));
            metric.fields.insert(field, combined);
        }
        metric
    }
}

/// Coerce a JSON value to a number.
///
/// Strings are stripped of thousands separators and any non-numeric
/// characters (units, whitespace) before parsing. Exponent notation and
/// ranges are treated as malformed.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_numeric_str(s),
        _ => None,
    }
}

fn parse_numeric_str(s: &str) -> Option<f64> {
    let chars: Vec<char> = s.trim().chars().collect();
    let mut cleaned = String::with_capacity(chars.len());
    let mut seen_digit = false;
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                cleaned.push(c);
            }
            '.' => cleaned.push(c),
            '-' if cleaned.is_empty() => cleaned.push(c),
            // Ranges like "5-10" have no single value
            '-' if seen_digit => return None,
            'e' | 'E' if is_exponent_marker(&chars, i) => return None,
            _ => {}
        }
    }

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `e` between a digit and a digit or sign, as in `1e3` or `2.5E-1`
fn is_exponent_marker(chars: &[char], i: usize) -> bool {
    let after_digit = i > 0 && chars[i - 1].is_ascii_digit();
    let before_number = chars
        .get(i + 1)
        .is_some_and(|next| next.is_ascii_digit() || *next == '-' || *next == '+');
    after_digit && before_number
}

/// Coerce a JSON value to minutes since midnight.
///
/// Accepts `HH:MM[:SS]` strings, timestamps (the clock time at the
/// timestamp's own offset is kept), epoch seconds or milliseconds (UTC), and
/// plain minute counts below 1440.
pub fn coerce_clock(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(clock_from_number),
        Value::String(s) => parse_clock_str(s.trim()),
        _ => None,
    }
}

fn clock_from_number(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw < 1440.0 {
        return Some(raw);
    }
    if raw < EPOCH_SECONDS_FLOOR {
        return None;
    }
    let millis = if raw >= EPOCH_MILLIS_THRESHOLD {
        raw as i64
    } else {
        (raw * 1000.0) as i64
    };
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| minutes_of_day(&dt))
}

fn parse_clock_str(s: &str) -> Option<f64> {
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Some(minutes_of_day(&time));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(minutes_of_day(&dt));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(minutes_of_day(&dt));
        }
    }
    s.parse::<f64>().ok().and_then(clock_from_number)
}

fn coerce_field_value(value: &Value, rule: UnitRule, unit: SourceUnit) -> Option<f64> {
    match rule {
        UnitRule::ClockTime => coerce_clock(value),
        _ => coerce_number(value).map(|raw| rule.apply(raw, unit)),
    }
}

fn matches_pattern(key: &str, spec: &FieldSpec) -> bool {
    let folded = fold_key(key);
    spec.patterns.iter().any(|pattern| folded.contains(pattern))
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Level-first search: scalar keys at this level, then nested containers
fn search_map(
    map: &Map<String, Value>,
    spec: &FieldSpec,
    depth: usize,
    path: &str,
) -> Option<(String, f64)> {
    if depth > MAX_FALLBACK_DEPTH {
        return None;
    }

    let scalar = map.iter().find_map(|(key, value)| {
        if value.is_object() || value.is_array() || !matches_pattern(key, spec) {
            return None;
        }
        coerce_field_value(value, spec.unit, SourceUnit::Inferred)
            .map(|found| (join_path(path, key), found))
    });
    if scalar.is_some() {
        return scalar;
    }

    map.iter()
        .find_map(|(key, value)| search_value(value, spec, depth + 1, &join_path(path, key)))
}

fn search_value(value: &Value, spec: &FieldSpec, depth: usize, path: &str) -> Option<(String, f64)> {
    if depth > MAX_FALLBACK_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => search_map(map, spec, depth, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| search_value(item, spec, depth + 1, &format!("{path}[{i}]"))),
        _ => None,
    }
}
