//! Weekly aggregation
//!
//! This module folds canonical daily metrics into ISO-week buckets and derives
//! week-over-week trend annotations:
//! - Per-day merge of a primary and a secondary source
//! - Per-week sums, counts, chronological series and headline values
//! - Gap filling so missing weeks break streaks
//! - Direction, percent change, rolling average and streak length

use crate::calendar::{week_key_of, week_keys_between, week_start, week_start_of};
use crate::circular::{circular_mean, signed_offset, MINUTES_PER_DAY};
use crate::types::{
    AnnotatedBucket, CanonicalDailyMetric, Direction, FieldAggregation, FieldId, SourceRole,
    TrendAnnotation, WeeklyBucket,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

/// Default number of trailing buckets in the rolling average
pub const DEFAULT_ROLLING_WINDOW: usize = 4;

/// Default relative change (percent) below which a week counts as flat
pub const DEFAULT_MATERIALITY_PCT: f64 = 1.0;

/// Aggregator for folding daily metrics into weekly buckets
pub struct Aggregator;

impl Aggregator {
    /// Fold daily metrics into weekly buckets, sorted by week.
    ///
    /// Grouping is by key, never by arrival order, so any permutation of the
    /// input produces identical buckets. Several metrics for the same day are
    /// first combined into one daily value per field.
    pub fn fold(daily_metrics: &[CanonicalDailyMetric], fields: &[FieldId]) -> Vec<WeeklyBucket> {
        let fields = FieldId::distinct(fields);
        let mut weeks: BTreeMap<String, BTreeMap<NaiveDate, BTreeMap<FieldId, Vec<f64>>>> =
            BTreeMap::new();

        for metric in daily_metrics {
            let day_values = weeks
                .entry(week_key_of(&metric.day))
                .or_default()
                .entry(metric.day)
                .or_default();
            for &field in &fields {
                if let Some(value) = metric.get(field) {
                    day_values.entry(field).or_default().push(value);
                }
            }
        }

        let buckets: Vec<WeeklyBucket> = weeks
            .into_iter()
            .map(|(week_key, days)| fold_week(week_key, days, &fields))
            .collect();

        debug!(
            daily_metrics = daily_metrics.len(),
            buckets = buckets.len(),
            "folded daily metrics into weekly buckets"
        );
        buckets
    }

    /// Insert empty buckets for weeks missing between the first and last bucket
    pub fn fill_gaps(buckets: Vec<WeeklyBucket>) -> Vec<WeeklyBucket> {
        match (buckets.first(), buckets.last()) {
            (Some(first), Some(last)) => {
                let (start, end) = (first.week_start, last.week_start);
                Self::fill_range(buckets, start, end)
            }
            _ => buckets,
        }
    }

    /// Produce a contiguous week sequence covering `start..=end` and every
    /// existing bucket, with empty buckets where no data was folded
    pub fn fill_range(buckets: Vec<WeeklyBucket>, start: NaiveDate, end: NaiveDate) -> Vec<WeeklyBucket> {
        let start = buckets.iter().map(|b| b.week_start).fold(start, NaiveDate::min);
        let end = buckets.iter().map(|b| b.week_start).fold(end, NaiveDate::max);

        let mut existing: BTreeMap<String, WeeklyBucket> = buckets
            .into_iter()
            .map(|b| (b.week_key.clone(), b))
            .collect();

        week_keys_between(start, end)
            .into_iter()
            .filter_map(|key| match existing.remove(&key) {
                Some(bucket) => Some(bucket),
                None => week_start(&key)
                    .ok()
                    .map(|monday| WeeklyBucket::empty(key, monday)),
            })
            .collect()
    }

    /// Annotate a chronologically sorted bucket sequence with trend fields.
    ///
    /// `primary` drives direction, percent change and rolling average;
    /// `window` is the rolling-average length in buckets, including the
    /// current one; `materiality_pct` is the relative change below which a
    /// week is flat.
    pub fn annotate_trend(
        buckets: &[WeeklyBucket],
        primary: FieldId,
        window: usize,
        materiality_pct: f64,
    ) -> Vec<AnnotatedBucket> {
        let window = window.max(1);
        let mut streak = 0u32;

        buckets
            .iter()
            .enumerate()
            .map(|(i, bucket)| {
                streak = if bucket.is_empty() { 0 } else { streak + 1 };

                let current = bucket.value(primary);
                let previous = i.checked_sub(1).and_then(|p| buckets[p].value(primary));
                let (direction, percent_change) = if i == 0 {
                    (None, None)
                } else {
                    (
                        direction_of(primary, current, previous, materiality_pct),
                        percent_change(primary, current, previous),
                    )
                };

                let start = (i + 1).saturating_sub(window);
                let trailing: Vec<f64> = buckets[start..=i]
                    .iter()
                    .filter_map(|b| b.value(primary))
                    .collect();
                let rolling_average = rolling_mean(primary, &trailing);

                AnnotatedBucket {
                    bucket: bucket.clone(),
                    trend: TrendAnnotation {
                        direction,
                        percent_change,
                        rolling_average,
                        streak_length: streak,
                    },
                }
            })
            .collect()
    }
}

/// Merge a primary and a secondary per-day value.
///
/// The primary wins unless it is zero or missing and the secondary's category
/// matches, in which case the secondary fills that day. Zero and missing are
/// not distinguishable upstream, so a genuine zero-activity day is also
/// backfilled.
pub fn merge_value(primary: Option<f64>, secondary: Option<f64>, category_matches: bool) -> Option<f64> {
    match primary {
        Some(value) if value != 0.0 => Some(value),
        _ if category_matches && secondary.is_some() => secondary,
        _ => primary,
    }
}

/// Merge two sources day by day.
///
/// Each day present in either source yields one merged metric. Merging is
/// per day, never per week, so no secondary value is counted twice.
/// `category` restricts backfill to secondary days reporting that category;
/// `None` accepts every secondary day.
pub fn merge_sources(
    primary: &[CanonicalDailyMetric],
    secondary: &[CanonicalDailyMetric],
    fields: &[FieldId],
    category: Option<&str>,
) -> Vec<CanonicalDailyMetric> {
    let fields = FieldId::distinct(fields);
    let primary_days = collapse_by_day(primary, &fields, SourceRole::Primary);
    let mut secondary_days = collapse_by_day(secondary, &fields, SourceRole::Secondary);

    let mut days: Vec<NaiveDate> = primary_days.keys().chain(secondary_days.keys()).copied().collect();
    days.sort();
    days.dedup();

    let mut backfilled_days = 0usize;
    let merged: Vec<CanonicalDailyMetric> = days
        .into_iter()
        .map(|day| {
            let from_primary = primary_days.get(&day);
            let from_secondary = secondary_days.remove(&day);
            let category_matches = match (&from_secondary, category) {
                (Some(s), Some(c)) => s.matches_category(c),
                (Some(_), None) => true,
                (None, _) => false,
            };

            let mut metric = CanonicalDailyMetric::new(day, SourceRole::Merged);
            if let Some(p) = from_primary {
                metric.categories.extend(p.categories.iter().cloned());
            }

            for &field in &fields {
                let p = from_primary.and_then(|m| m.get(field));
                let s = from_secondary.as_ref().and_then(|m| m.get(field));
                let value = merge_value(p, s, category_matches);
                if value.is_some() && value != p {
                    metric.backfilled.insert(field);
                }
                metric.fields.insert(field, value);
            }

            if !metric.backfilled.is_empty() {
                backfilled_days += 1;
                if let Some(s) = from_secondary {
                    metric.categories.extend(s.categories);
                }
            }
            metric
        })
        .collect();

    debug!(
        days = merged.len(),
        backfilled_days,
        "merged primary and secondary sources"
    );
    merged
}

/// Collapse metrics sharing a day into one metric per day
fn collapse_by_day(
    metrics: &[CanonicalDailyMetric],
    fields: &[FieldId],
    source: SourceRole,
) -> BTreeMap<NaiveDate, CanonicalDailyMetric> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&CanonicalDailyMetric>> = BTreeMap::new();
    for metric in metrics {
        grouped.entry(metric.day).or_default().push(metric);
    }

    grouped
        .into_iter()
        .map(|(day, group)| {
            let mut collapsed = CanonicalDailyMetric::new(day, source);
            for metric in &group {
                collapsed.categories.extend(metric.categories.iter().cloned());
            }
            for &field in fields {
                let values: Vec<f64> = group.iter().filter_map(|m| m.get(field)).collect();
                collapsed.fields.insert(field, field.combine(&values));
            }
            (day, collapsed)
        })
        .collect()
}

fn fold_week(
    week_key: String,
    days: BTreeMap<NaiveDate, BTreeMap<FieldId, Vec<f64>>>,
    fields: &[FieldId],
) -> WeeklyBucket {
    let monday = days
        .keys()
        .next()
        .and_then(|day| week_start_of(day))
        .unwrap_or(NaiveDate::MIN);
    let mut bucket = WeeklyBucket::empty(week_key, monday);

    for values in days.values() {
        if values.is_empty() {
            continue;
        }
        bucket.days_with_data += 1;

        for &field in fields {
            let Some(daily) = values.get(&field).and_then(|v| field.combine(v)) else {
                continue;
            };
            *bucket.sums.entry(field).or_insert(0.0) += daily;
            *bucket.counts.entry(field).or_insert(0) += 1;
            bucket.series.entry(field).or_default().push(daily);
        }
    }

    for &field in fields {
        let (Some(&sum), Some(&count)) = (bucket.sums.get(&field), bucket.counts.get(&field)) else {
            continue;
        };
        let headline = match field.aggregation() {
            FieldAggregation::Sum => Some(sum),
            FieldAggregation::Mean => Some(sum / count as f64),
            FieldAggregation::ClockTime => bucket.series.get(&field).and_then(|s| circular_mean(s)),
        };
        if let Some(value) = headline {
            bucket.values.insert(field, value);
        }
    }

    bucket
}

fn direction_of(
    field: FieldId,
    current: Option<f64>,
    previous: Option<f64>,
    materiality_pct: f64,
) -> Option<Direction> {
    let (cur, prev) = (current?, previous?);

    let (delta, threshold) = if field.is_clock_time() {
        (signed_offset(prev, cur), MINUTES_PER_DAY * materiality_pct / 100.0)
    } else {
        (cur - prev, prev.abs() * materiality_pct / 100.0)
    };

    Some(if delta > 0.0 && delta >= threshold {
        Direction::Up
    } else if delta < 0.0 && -delta >= threshold {
        Direction::Down
    } else {
        Direction::Flat
    })
}

fn percent_change(field: FieldId, current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    if field.is_clock_time() {
        return None;
    }
    match (current, previous) {
        (Some(cur), Some(prev)) if prev != 0.0 => Some((cur - prev) / prev * 100.0),
        _ => None,
    }
}

fn rolling_mean(field: FieldId, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    if field.is_clock_time() {
        return circular_mean(values);
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
