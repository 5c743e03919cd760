//! Calendar bucketing
//!
//! Maps dates to day keys (`YYYY-MM-DD`) and ISO-8601 week keys (`YYYY-Www`).
//! ISO weeks start on Monday and week 1 is the week holding the year's first
//! Thursday, so the last days of December can belong to week 1 of the next
//! year and the first days of January to week 52/53 of the previous one.

use crate::error::ComputeError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde_json::Value;

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Smallest number read as epoch seconds (2001-09-09); smaller ones are not timestamps
const EPOCH_SECONDS_FLOOR: f64 = 1e9;

/// Day key (`YYYY-MM-DD`) of any date or timestamp
pub fn day_key_of<D: Datelike>(date: &D) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

/// ISO week key (`YYYY-Www`) of any date or timestamp.
///
/// The time-of-day component, if any, is ignored.
pub fn week_key_of<D: Datelike>(date: &D) -> String {
    let (year, week) = iso_week_of(date);
    format!("{year:04}-W{week:02}")
}

/// ISO year and week number of a date.
///
/// Shifts to the Thursday of the date's Monday-start week; that Thursday's
/// calendar year is the ISO year, and the week number counts Thursdays from
/// the first Thursday of that year.
pub fn iso_week_of<D: Datelike>(date: &D) -> (i32, u32) {
    let Some(day) = NaiveDate::from_yo_opt(date.year(), date.ordinal()) else {
        return (date.year(), 1);
    };

    let thursday = nearest_thursday(day);
    let iso_year = thursday.year();
    let first = first_thursday(iso_year).unwrap_or(thursday);
    let weeks = ((thursday - first).num_days() as f64 / 7.0).round() as u32;

    (iso_year, 1 + weeks)
}

/// Monday of the ISO week containing the date
pub fn week_start_of<D: Datelike>(date: &D) -> Option<NaiveDate> {
    let day = NaiveDate::from_yo_opt(date.year(), date.ordinal())?;
    Some(day - Duration::days(day.weekday().num_days_from_monday() as i64))
}

/// Parse a week key (`YYYY-Www`) back into its year and week number
pub fn parse_week_key(key: &str) -> Result<(i32, u32), ComputeError> {
    let invalid = || ComputeError::DateParseError(format!("invalid ISO week key: {key}"));

    let (year, week) = key.split_once("-W").ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let week: u32 = week.parse().map_err(|_| invalid())?;

    // Rejects week 53 in years that only have 52
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(invalid)?;
    Ok((year, week))
}

/// Monday of the ISO week named by a week key
pub fn week_start(key: &str) -> Result<NaiveDate, ComputeError> {
    let (year, week) = parse_week_key(key)?;
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
        .ok_or_else(|| ComputeError::DateParseError(format!("invalid ISO week key: {key}")))
}

/// Contiguous week keys from the week of `start` through the week of `end`
pub fn week_keys_between(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let (Some(mut monday), Some(last)) = (week_start_of(&start), week_start_of(&end)) else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    while monday <= last {
        keys.push(week_key_of(&monday));
        monday += Duration::days(7);
    }
    keys
}

/// Parse the calendar day out of a record's date-bearing value.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps (the local calendar day of the
/// offset is kept), naive `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS`
/// timestamps, compact `YYYYMMDD` dates, and epoch seconds or milliseconds.
pub fn parse_record_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => n.as_f64().and_then(date_from_number),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }
    if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
        return s.parse::<f64>().ok().and_then(date_from_number);
    }
    None
}

fn date_from_number(raw: f64) -> Option<NaiveDate> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw < EPOCH_SECONDS_FLOOR {
        return compact_date(raw);
    }
    let millis = if raw >= EPOCH_MILLIS_THRESHOLD {
        raw as i64
    } else {
        (raw * 1000.0) as i64
    };
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// `YYYYMMDD` as an integer, e.g. `20240115`
fn compact_date(raw: f64) -> Option<NaiveDate> {
    if raw.fract() != 0.0 || !(10_000_101.0..=99_991_231.0).contains(&raw) {
        return None;
    }
    let packed = raw as u32;
    NaiveDate::from_ymd_opt((packed / 10_000) as i32, packed / 100 % 100, packed % 100)
}

fn nearest_thursday(day: NaiveDate) -> NaiveDate {
    let offset = 3 - day.weekday().num_days_from_monday() as i64;
    day + Duration::days(offset)
}

fn first_thursday(year: i32) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let offset = (Weekday::Thu.num_days_from_monday() as i64
        - jan1.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    Some(jan1 + Duration::days(offset))
}
