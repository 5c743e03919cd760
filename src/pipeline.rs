//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Trends.
//! It orchestrates the full pipeline from raw source records to a trend report.

use crate::aggregator::{merge_sources, Aggregator};
use crate::circular::{unwrap_series, wrap_minutes};
use crate::config::{SortOrder, TrendConfig};
use crate::correlation::correlation_matrix;
use crate::encoder::{InputCounts, ReportEncoder, ReportSections};
use crate::error::ComputeError;
use crate::forecast::Forecaster;
use crate::normalizer::FieldNormalizer;
use crate::schema::NormalizedSeriesSource;
use crate::types::{
    CanonicalDailyMetric, ClockTimeSummary, CorrelationMatrix, FieldId, ForecastResult,
    SourceRole, TrendReport, WeeklyBucket,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

/// Compute weekly trends from raw source JSON and return the report as JSON.
///
/// # Arguments
/// * `primary_json` - Activity-level records (array or envelope)
/// * `secondary_json` - Optional daily-summary records used to fill gaps
/// * `fields` - Fields to aggregate and forecast
/// * `primary_field` - Field driving the trend annotation
/// * `category` - Activity category a secondary day must report to backfill
/// * `config` - Trend configuration
///
/// Every requested non-clock field is correlated when there are at least two.
///
/// # Example
/// ```ignore
/// let report_json = weekly_trends_json(
///     activities_json,
///     Some(daily_json),
///     &[FieldId::StepCount, FieldId::DistanceKm],
///     FieldId::StepCount,
///     Some("walk"),
///     TrendConfig::default(),
/// )?;
/// ```
pub fn weekly_trends_json(
    primary_json: &str,
    secondary_json: Option<&str>,
    fields: &[FieldId],
    primary_field: FieldId,
    category: Option<&str>,
    config: TrendConfig,
) -> Result<String, ComputeError> {
    let primary = NormalizedSeriesSource::from_json(primary_json)?;
    let correlate: Vec<FieldId> = fields.iter().copied().filter(|f| !f.is_clock_time()).collect();

    let mut request = TrendRequest::new(primary, primary_field)
        .with_fields(fields)
        .with_correlation(&correlate);
    if let Some(json) = secondary_json {
        request = request.with_secondary(NormalizedSeriesSource::from_json(json)?, category);
    }

    let processor = TrendProcessor::new(config)?;
    processor.process_to_json(&request)
}

/// Inputs of one trend computation
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRequest {
    pub primary: NormalizedSeriesSource,
    pub secondary: Option<NormalizedSeriesSource>,
    /// Category a secondary day must report to backfill; `None` accepts all
    pub category: Option<String>,
    pub fields: Vec<FieldId>,
    pub primary_field: FieldId,
    /// Fields to correlate across aligned weeks
    pub correlate: Vec<FieldId>,
    /// Inclusive day range to cover with (possibly empty) weeks
    pub range: Option<(NaiveDate, NaiveDate)>,
}

impl TrendRequest {
    pub fn new(primary: NormalizedSeriesSource, primary_field: FieldId) -> Self {
        Self {
            primary,
            secondary: None,
            category: None,
            fields: vec![primary_field],
            primary_field,
            correlate: Vec::new(),
            range: None,
        }
    }

    pub fn with_secondary(mut self, secondary: NormalizedSeriesSource, category: Option<&str>) -> Self {
        self.secondary = Some(secondary);
        self.category = category.map(str::to_string);
        self
    }

    pub fn with_fields(mut self, fields: &[FieldId]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn with_correlation(mut self, fields: &[FieldId]) -> Self {
        self.correlate = fields.to_vec();
        self
    }

    pub fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.range = Some((start.min(end), start.max(end)));
        self
    }

    /// Every field any stage needs, deduplicated in table order
    fn all_fields(&self) -> Vec<FieldId> {
        let mut fields: Vec<FieldId> = self
            .fields
            .iter()
            .chain(&self.correlate)
            .copied()
            .chain(std::iter::once(self.primary_field))
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Fields that get forecasts and clock summaries, deduplicated
    fn reported_fields(&self) -> Vec<FieldId> {
        let mut fields = self.fields.clone();
        if !fields.contains(&self.primary_field) {
            fields.push(self.primary_field);
        }
        fields.sort();
        fields.dedup();
        fields
    }
}

/// Processor holding a validated configuration and a report identity.
///
/// Each call to `process` recomputes everything from its inputs; no state
/// carries over between calls.
pub struct TrendProcessor {
    config: TrendConfig,
    encoder: ReportEncoder,
}

impl Default for TrendProcessor {
    fn default() -> Self {
        Self {
            config: TrendConfig::default(),
            encoder: ReportEncoder::new(),
        }
    }
}

impl TrendProcessor {
    /// Create a processor, rejecting an invalid configuration
    pub fn new(config: TrendConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            encoder: ReportEncoder::new(),
        })
    }

    /// Create a processor with a specific report instance ID
    pub fn with_instance_id(config: TrendConfig, instance_id: String) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            encoder: ReportEncoder::with_instance_id(instance_id),
        })
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Run the full pipeline for one request.
    ///
    /// Pipeline stages:
    /// 1. FieldNormalizer - Per-day canonical metrics for each source
    /// 2. merge_sources - Per-day primary/secondary merge
    /// 3. Aggregator - Weekly fold, gap fill and trend annotation
    /// 4. Forecaster - Next-week forecast per reported field
    /// 5. correlation_matrix - Correlation across aligned weeks
    /// 6. ClockTimeSummary - Circular summary of clock fields
    /// 7. ReportEncoder - Provenance stamping
    pub fn process(&self, request: &TrendRequest) -> Result<TrendReport, ComputeError> {
        let fields = request.all_fields();

        // Stage 1-2: Normalize and merge
        let primary = FieldNormalizer::daily_metrics(request.primary.records(), &fields, SourceRole::Primary);
        let daily = match &request.secondary {
            Some(secondary) => {
                let secondary =
                    FieldNormalizer::daily_metrics(secondary.records(), &fields, SourceRole::Secondary);
                merge_sources(&primary, &secondary, &fields, request.category.as_deref())
            }
            None => primary,
        };

        // Stage 3: Fold and annotate
        let mut buckets = Aggregator::fold(&daily, &fields);
        if let Some((start, end)) = request.range {
            buckets = Aggregator::fill_range(buckets, start, end);
        } else if self.config.fill_gaps {
            buckets = Aggregator::fill_gaps(buckets);
        }
        let mut weeks = Aggregator::annotate_trend(
            &buckets,
            request.primary_field,
            self.config.rolling_window,
            self.config.materiality_threshold_pct,
        );

        let reported = request.reported_fields();

        // Stage 4: Forecast
        let forecasts: BTreeMap<FieldId, ForecastResult> = reported
            .iter()
            .map(|&field| (field, self.forecast_field(&buckets, field)))
            .collect();

        // Stage 5: Correlate
        let correlation = self.correlate(&buckets, &request.correlate)?;

        // Stage 6: Clock summaries
        let clock_times: BTreeMap<FieldId, ClockTimeSummary> = reported
            .iter()
            .filter(|f| f.is_clock_time())
            .filter_map(|&field| self.clock_summary(&daily, field).map(|s| (field, s)))
            .collect();

        if self.config.order == SortOrder::Descending {
            weeks.reverse();
        }

        let counts = InputCounts {
            primary_records: request.primary.len(),
            secondary_records: request.secondary.as_ref().map_or(0, |s| s.len()),
            days: daily.iter().filter(|m| m.has_data(&fields)).count(),
            backfilled_days: daily.iter().filter(|m| !m.backfilled.is_empty()).count(),
        };
        debug!(
            weeks = weeks.len(),
            forecasts = forecasts.len(),
            days = counts.days,
            "trend report computed"
        );

        // Stage 7: Encode
        Ok(self.encoder.encode(
            ReportSections {
                primary_field: request.primary_field,
                weeks,
                forecasts,
                correlation,
                clock_times,
            },
            counts,
        ))
    }

    /// Run the pipeline and encode the report as JSON
    pub fn process_to_json(&self, request: &TrendRequest) -> Result<String, ComputeError> {
        let report = self.process(request)?;
        self.encoder.encode_to_json(&report)
    }

    /// Forecast a field's weekly headline values, skipping empty weeks.
    ///
    /// Clock series are unrolled across midnight before fitting and the point
    /// forecasts wrapped back onto the clock; the regression itself stays in
    /// unrolled minutes.
    fn forecast_field(&self, buckets: &[WeeklyBucket], field: FieldId) -> ForecastResult {
        let values: Vec<f64> = buckets.iter().filter_map(|b| b.value(field)).collect();
        let options = self.config.forecast_options(field);

        if !field.is_clock_time() {
            return Forecaster::forecast(&values, &options);
        }

        let mut result = Forecaster::forecast(&unwrap_series(&values), &options);
        result.regression_forecast = result.regression_forecast.map(wrap_minutes);
        result.ewma = result.ewma.map(wrap_minutes);
        result.blended = result.blended.map(wrap_minutes);
        result
    }

    /// Correlate fields over the weeks where every one of them has a value.
    ///
    /// Clock series are unrolled across midnight first so a steady drift past
    /// 00:00 stays monotonic.
    fn correlate(
        &self,
        buckets: &[WeeklyBucket],
        fields: &[FieldId],
    ) -> Result<Option<CorrelationMatrix>, ComputeError> {
        let fields = FieldId::distinct(fields);
        if fields.len() < 2 {
            return Ok(None);
        }

        let aligned: Vec<&WeeklyBucket> = buckets
            .iter()
            .filter(|b| fields.iter().all(|f| b.value(*f).is_some()))
            .collect();

        let series: Vec<(String, Vec<f64>)> = fields
            .iter()
            .map(|&field| {
                let values: Vec<f64> = aligned.iter().filter_map(|b| b.value(field)).collect();
                let values = if field.is_clock_time() {
                    unwrap_series(&values)
                } else {
                    values
                };
                (field.as_str().to_string(), values)
            })
            .collect();

        correlation_matrix(&series, self.config.correlation_method).map(Some)
    }

    /// Summarize a clock field over a contiguous day range
    fn clock_summary(&self, daily: &[CanonicalDailyMetric], field: FieldId) -> Option<ClockTimeSummary> {
        let by_day: BTreeMap<NaiveDate, f64> = daily
            .iter()
            .filter_map(|m| m.get(field).map(|v| (m.day, v)))
            .collect();
        let (&first, _) = by_day.first_key_value()?;
        let (&last, _) = by_day.last_key_value()?;

        let series: Vec<Option<f64>> = first
            .iter_days()
            .take_while(|day| *day <= last)
            .map(|day| by_day.get(&day).copied())
            .collect();

        Some(ClockTimeSummary::from_daily_series(
            &series,
            self.config.circular_median_window,
            self.config.clock_window_half_width_minutes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, Direction};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn source(value: Value) -> NormalizedSeriesSource {
        NormalizedSeriesSource::from_value(value).unwrap()
    }

    fn processor(config: TrendConfig) -> TrendProcessor {
        TrendProcessor::with_instance_id(config, "test-instance".to_string()).unwrap()
    }

    fn week_of_walks() -> (Value, Value) {
        let steps = [1000, 0, 3000, 4000, 0, 6000, 7000];
        let primary: Vec<Value> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| json!({"date": format!("2024-01-{:02}", 15 + i), "type": "walk", "steps": s}))
            .collect();
        let secondary = json!({
            "data": [
                {"calendarDate": "2024-01-16", "activityType": "walk", "totalSteps": 2000},
                {"calendarDate": "2024-01-19", "activityType": "walk", "totalSteps": 5000}
            ]
        });
        (Value::Array(primary), secondary)
    }

    #[test]
    fn test_end_to_end_week_with_backfill() {
        let (primary, secondary) = week_of_walks();
        let request = TrendRequest::new(source(primary), FieldId::StepCount)
            .with_secondary(source(secondary), Some("walk"));

        let report = processor(TrendConfig::default()).process(&request).unwrap();

        assert_eq!(report.weeks.len(), 1);
        let week = &report.weeks[0].bucket;
        assert_eq!(week.week_key, "2024-W03");
        assert_eq!(week.days_with_data, 7);
        assert_eq!(week.value(FieldId::StepCount), Some(28000.0));
        assert_eq!(week.counts.get(&FieldId::StepCount), Some(&7));
        assert_eq!(report.provenance.backfilled_days, 2);
        assert_eq!(report.provenance.primary_records, 7);
        assert_eq!(report.provenance.secondary_records, 2);
        assert_eq!(report.producer.instance_id, "test-instance");
    }

    #[test]
    fn test_category_mismatch_keeps_primary_zeros() {
        let (primary, secondary) = week_of_walks();
        let request = TrendRequest::new(source(primary), FieldId::StepCount)
            .with_secondary(source(secondary), Some("run"));

        let report = processor(TrendConfig::default()).process(&request).unwrap();
        let week = &report.weeks[0].bucket;

        assert_eq!(week.value(FieldId::StepCount), Some(21000.0));
        assert_eq!(week.days_with_data, 7);
        assert_eq!(report.provenance.backfilled_days, 0);
    }

    fn multi_week_records() -> Value {
        json!([
            {"date": "2024-01-01", "steps": 10000, "distance_km": 5.0},
            {"date": "2024-01-15", "steps": 12000, "distance_km": 6.5},
            {"date": "2024-01-22", "steps": 14000, "distance_km": 7.0},
            {"date": "2024-01-29", "steps": 16000, "distance_km": 8.1}
        ])
    }

    #[test]
    fn test_gap_fill_forecast_and_correlation() {
        let request = TrendRequest::new(source(multi_week_records()), FieldId::StepCount)
            .with_fields(&[FieldId::StepCount, FieldId::DistanceKm])
            .with_correlation(&[FieldId::StepCount, FieldId::DistanceKm]);

        let report = processor(TrendConfig::default()).process(&request).unwrap();

        let keys: Vec<&str> = report.weeks.iter().map(|w| w.bucket.week_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-W01", "2024-W02", "2024-W03", "2024-W04", "2024-W05"]);

        let streaks: Vec<u32> = report.weeks.iter().map(|w| w.trend.streak_length).collect();
        assert_eq!(streaks, vec![1, 0, 1, 2, 3]);
        assert_eq!(report.weeks[2].trend.direction, None);
        assert_eq!(report.weeks[3].trend.direction, Some(Direction::Up));

        let steps = &report.forecasts[&FieldId::StepCount];
        assert_eq!(steps.points_used, 4);
        assert_eq!(steps.confidence, Confidence::High);
        assert!((steps.regression_forecast.unwrap() - 18000.0).abs() < 1e-6);
        assert!((steps.blended.unwrap() - 16125.0).abs() < 1e-6);

        let correlation = report.correlation.unwrap();
        assert_eq!(correlation.sample_size, 4);
        assert!(correlation.get("step_count", "distance_km").unwrap() > 0.9);
    }

    #[test]
    fn test_descending_order_and_no_gap_fill() {
        let config = TrendConfig {
            fill_gaps: false,
            order: SortOrder::Descending,
            ..TrendConfig::default()
        };
        let request = TrendRequest::new(source(multi_week_records()), FieldId::StepCount);

        let report = processor(config).process(&request).unwrap();

        let keys: Vec<&str> = report.weeks.iter().map(|w| w.bucket.week_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-W05", "2024-W04", "2024-W03", "2024-W01"]);
        assert_eq!(report.weeks[0].trend.streak_length, 4);
        assert!(report.correlation.is_none());
    }

    #[test]
    fn test_range_extends_with_empty_weeks() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 11).unwrap();
        let request =
            TrendRequest::new(source(multi_week_records()), FieldId::StepCount).with_range(end, start);

        let report = processor(TrendConfig::default()).process(&request).unwrap();

        assert_eq!(report.weeks.len(), 6);
        let last = report.weeks.last().unwrap();
        assert_eq!(last.bucket.week_key, "2024-W06");
        assert!(last.bucket.is_empty());
        assert_eq!(last.trend.streak_length, 0);
    }

    #[test]
    fn test_clock_fields_summarized_and_forecast_on_circle() {
        let records = json!([
            {"date": "2024-01-08", "sleep_onset": "23:30"},
            {"date": "2024-01-09", "sleep_onset": "23:50"},
            {"date": "2024-01-15", "sleep_onset": "00:10"},
            {"date": "2024-01-22", "sleep_onset": "00:20"}
        ]);
        let request = TrendRequest::new(source(records), FieldId::SleepOnset);

        let report = processor(TrendConfig::default()).process(&request).unwrap();

        let summary = &report.clock_times[&FieldId::SleepOnset];
        assert_eq!(summary.days, 4);
        let mean = summary.mean.unwrap();
        assert!(mean > 1430.0 || mean < 10.0);

        let forecast = &report.forecasts[&FieldId::SleepOnset];
        let blended = forecast.blended.unwrap();
        assert!((0.0..1440.0).contains(&blended));
        // Weekly means 23:40, 00:10, 00:20 keep moving later past midnight
        assert!(blended < 120.0);
        assert_eq!(report.weeks[1].trend.percent_change, None);
    }

    #[test]
    fn test_clock_correlation_across_midnight() {
        let records = json!([
            {"date": "2024-01-01", "steps": 1000, "sleep_onset": "23:40"},
            {"date": "2024-01-08", "steps": 2000, "sleep_onset": "23:50"},
            {"date": "2024-01-15", "steps": 3000, "sleep_onset": "00:00"},
            {"date": "2024-01-22", "steps": 4000, "sleep_onset": "00:10"}
        ]);
        let request = TrendRequest::new(source(records), FieldId::StepCount)
            .with_correlation(&[FieldId::StepCount, FieldId::SleepOnset]);

        let report = processor(TrendConfig::default()).process(&request).unwrap();
        let correlation = report.correlation.unwrap();

        assert_eq!(correlation.sample_size, 4);
        // Onset moves 10 minutes later each week, through midnight
        assert!(correlation.get("step_count", "sleep_onset").unwrap() > 0.99);
    }

    #[test]
    fn test_empty_input() {
        let request = TrendRequest::new(NormalizedSeriesSource::Empty, FieldId::StepCount);
        let report = processor(TrendConfig::default()).process(&request).unwrap();

        assert!(report.weeks.is_empty());
        assert_eq!(report.provenance.days, 0);
        assert_eq!(report.forecasts[&FieldId::StepCount].confidence, Confidence::Insufficient);
        assert!(report.clock_times.is_empty());
    }

    #[test]
    fn test_weekly_trends_json() {
        let (primary, secondary) = week_of_walks();
        let json = weekly_trends_json(
            &primary.to_string(),
            Some(&secondary.to_string()),
            &[FieldId::StepCount],
            FieldId::StepCount,
            Some("walk"),
            TrendConfig::default(),
        )
        .unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["producer"]["name"], crate::PRODUCER_NAME);
        assert_eq!(value["weeks"][0]["week_key"], "2024-W03");
        assert_eq!(value["weeks"][0]["values"]["step_count"], 28000.0);
        assert_eq!(value["weeks"][0]["streak_length"], 1);
        assert!(value.get("correlation").is_none());
    }

    #[test]
    fn test_boundary_errors() {
        let invalid_json = weekly_trends_json(
            "not valid json",
            None,
            &[FieldId::StepCount],
            FieldId::StepCount,
            None,
            TrendConfig::default(),
        );
        assert!(matches!(invalid_json, Err(ComputeError::JsonError(_))));

        let bad_config = TrendConfig {
            forecast_window: 0,
            ..TrendConfig::default()
        };
        assert!(matches!(
            TrendProcessor::new(bad_config),
            Err(ComputeError::InvalidConfig(_))
        ));
    }
}
