//! Core types for the Synheart Trends pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: canonical daily metrics, weekly buckets, trend annotations,
//! forecasts, correlation matrices and clock-time summaries.

use crate::circular::circular_mean;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable semantic identifier for a metric, independent of any source's naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    StepCount,
    DistanceKm,
    DurationMin,
    ActiveCalories,
    SleepDurationMin,
    RestingHeartRate,
    /// Sleep onset as minutes since midnight
    SleepOnset,
    /// Wake time as minutes since midnight
    WakeTime,
}

impl FieldId {
    /// Every known field, in table order
    pub const ALL: [FieldId; 8] = [
        FieldId::StepCount,
        FieldId::DistanceKm,
        FieldId::DurationMin,
        FieldId::ActiveCalories,
        FieldId::SleepDurationMin,
        FieldId::RestingHeartRate,
        FieldId::SleepOnset,
        FieldId::WakeTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::StepCount => "step_count",
            FieldId::DistanceKm => "distance_km",
            FieldId::DurationMin => "duration_min",
            FieldId::ActiveCalories => "active_calories",
            FieldId::SleepDurationMin => "sleep_duration_min",
            FieldId::RestingHeartRate => "resting_heart_rate",
            FieldId::SleepOnset => "sleep_onset",
            FieldId::WakeTime => "wake_time",
        }
    }

    /// How several values of this field collapse into one
    pub fn aggregation(&self) -> FieldAggregation {
        match self {
            FieldId::StepCount
            | FieldId::DistanceKm
            | FieldId::DurationMin
            | FieldId::ActiveCalories => FieldAggregation::Sum,
            FieldId::SleepDurationMin | FieldId::RestingHeartRate => FieldAggregation::Mean,
            FieldId::SleepOnset | FieldId::WakeTime => FieldAggregation::ClockTime,
        }
    }

    pub fn is_clock_time(&self) -> bool {
        self.aggregation() == FieldAggregation::ClockTime
    }

    /// Sorted field list with repeats removed
    pub fn distinct(fields: &[FieldId]) -> Vec<FieldId> {
        let mut distinct = fields.to_vec();
        distinct.sort();
        distinct.dedup();
        distinct
    }

    /// Collapse several same-day values of this field into one.
    ///
    /// Values are sorted first so the result does not depend on arrival order.
    pub fn combine(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        match self.aggregation() {
            FieldAggregation::Sum => Some(sorted.iter().sum()),
            FieldAggregation::Mean => Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
            FieldAggregation::ClockTime => circular_mean(&sorted),
        }
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation semantics of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAggregation {
    /// Additive quantity; the weekly headline is the sum
    Sum,
    /// Level quantity; the weekly headline is the per-day mean
    Mean,
    /// Minutes since midnight; averaged on the 24h circle
    ClockTime,
}

/// Which upstream source a daily metric came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// Activity-level source, preferred when it has data
    Primary,
    /// Daily-summary source, used to fill primary gaps
    Secondary,
    /// Result of a per-day merge of both
    Merged,
}

/// One calendar day of normalized values for one logical entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDailyMetric {
    /// Calendar day the values belong to
    pub day: NaiveDate,
    /// Source the values came from
    pub source: SourceRole,
    /// Lowercased activity categories reported for the day
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Normalized field values; `None` means no opinion, never zero
    pub fields: BTreeMap<FieldId, Option<f64>>,
    /// Fields whose value was substituted from the secondary source
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub backfilled: BTreeSet<FieldId>,
}

impl CanonicalDailyMetric {
    pub fn new(day: NaiveDate, source: SourceRole) -> Self {
        Self {
            day,
            source,
            categories: BTreeSet::new(),
            fields: BTreeMap::new(),
            backfilled: BTreeSet::new(),
        }
    }

    /// Builder-style setter used by callers and tests
    pub fn with(mut self, field: FieldId, value: Option<f64>) -> Self {
        self.fields.insert(field, value);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.categories.insert(category.to_lowercase());
        self
    }

    /// Value of a field, flattening "absent" and "present but null"
    pub fn get(&self, field: FieldId) -> Option<f64> {
        self.fields.get(&field).copied().flatten()
    }

    /// Check if the day carries a value for any of the given fields
    pub fn has_data(&self, fields: &[FieldId]) -> bool {
        fields.iter().any(|f| self.get(*f).is_some())
    }

    /// Check whether the day reports the given category (case-insensitive)
    pub fn matches_category(&self, category: &str) -> bool {
        self.categories.contains(&category.to_lowercase())
    }
}

/// Per-week fold of canonical daily metrics sharing an ISO week key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBucket {
    /// ISO week key (`YYYY-Www`)
    pub week_key: String,
    /// Monday of the ISO week
    pub week_start: NaiveDate,
    /// Distinct days carrying at least one requested field
    pub days_with_data: u32,
    /// Sum of contributing daily values per field
    pub sums: BTreeMap<FieldId, f64>,
    /// Number of contributing days per field
    pub counts: BTreeMap<FieldId, u32>,
    /// Chronological daily values per field
    pub series: BTreeMap<FieldId, Vec<f64>>,
    /// Headline value per field (sum, mean, or circular mean)
    pub values: BTreeMap<FieldId, f64>,
}

impl WeeklyBucket {
    /// Create an empty bucket for a week
    pub fn empty(week_key: String, week_start: NaiveDate) -> Self {
        Self {
            week_key,
            week_start,
            days_with_data: 0,
            sums: BTreeMap::new(),
            counts: BTreeMap::new(),
            series: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Headline value of a field for this week
    pub fn value(&self, field: FieldId) -> Option<f64> {
        self.values.get(&field).copied()
    }

    /// Per-day average of a field over the days that reported it
    pub fn average(&self, field: FieldId) -> Option<f64> {
        if field.is_clock_time() {
            return self.series.get(&field).and_then(|s| circular_mean(s));
        }
        match (self.sums.get(&field), self.counts.get(&field)) {
            (Some(sum), Some(&count)) if count > 0 => Some(sum / count as f64),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days_with_data == 0
    }
}

/// Week-over-week direction of the primary metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Arrow glyph for compact display
    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Up => "↑",
            Direction::Down => "↓",
            Direction::Flat => "→",
        }
    }
}

/// Trend fields derived from a bucket and its predecessors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendAnnotation {
    /// Direction vs. the previous bucket; absent on the first bucket
    pub direction: Option<Direction>,
    /// Percent change vs. the previous bucket; absent when previous is zero
    pub percent_change: Option<f64>,
    /// Mean of the primary metric over the trailing window
    pub rolling_average: Option<f64>,
    /// Consecutive buckets with data, ending here
    pub streak_length: u32,
}

/// Weekly bucket with its trend annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedBucket {
    #[serde(flatten)]
    pub bucket: WeeklyBucket,
    #[serde(flatten)]
    pub trend: TrendAnnotation,
}

/// Ordinary least squares fit of value against index
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Forecast confidence derived from regression fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Insufficient,
    Low,
    Medium,
    High,
}

/// Next-period forecast for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Regression fit over the window
    pub regression: Regression,
    /// Regression point forecast; absent with too few points
    pub regression_forecast: Option<f64>,
    /// Exponentially weighted moving average of the window
    pub ewma: Option<f64>,
    /// Blend of regression and EWMA forecasts
    pub blended: Option<f64>,
    /// Confidence label
    pub confidence: Confidence,
    /// Number of points used after windowing
    pub points_used: usize,
}

/// Correlation method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// Linear (Pearson) correlation
    #[default]
    Pearson,
    /// Rank (Spearman) correlation
    Spearman,
}

/// Pairwise correlation matrix across named metrics.
///
/// A pair involving a zero-variance series has no defined correlation; its
/// entry is `0.0` and `defined[i][j]` is `false`. Callers must consult
/// `defined` before reading a zero as "uncorrelated".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub metric_names: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    pub defined: Vec<Vec<bool>>,
    pub method: CorrelationMethod,
    /// Number of aligned samples per series
    pub sample_size: usize,
}

/// Wraparound-safe clock interval in minutes since midnight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockWindow {
    pub start: f64,
    pub end: f64,
}

/// Circular summary of a clock-time field over the requested range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockTimeSummary {
    /// Circular mean over all days
    pub mean: Option<f64>,
    /// Latest trailing circular median
    pub rolling_median: Option<f64>,
    /// Typical window around the mean
    pub typical_window: Option<ClockWindow>,
    /// Number of days contributing
    pub days: usize,
}

/// Producer metadata stamped on every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Where a report's numbers came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProvenance {
    pub computed_at_utc: String,
    /// Version of the field table used for normalization
    pub field_table_version: String,
    pub primary_records: usize,
    pub secondary_records: usize,
    /// Calendar days carrying at least one requested field
    pub days: usize,
    /// Days where at least one field was filled from the secondary source
    pub backfilled_days: usize,
}

/// Full output of one trend computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub producer: ReportProducer,
    pub provenance: ReportProvenance,
    /// Field driving direction, percent change and rolling average
    pub primary_field: FieldId,
    /// Annotated weeks in the requested order
    pub weeks: Vec<AnnotatedBucket>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub forecasts: BTreeMap<FieldId, ForecastResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationMatrix>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clock_times: BTreeMap<FieldId, ClockTimeSummary>,
}
