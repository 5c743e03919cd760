//! Trend configuration
//!
//! All tunables for one aggregation request live in `TrendConfig`, passed
//! explicitly to the processor. There is no process-wide state.

use crate::aggregator::{DEFAULT_MATERIALITY_PCT, DEFAULT_ROLLING_WINDOW};
use crate::circular::{DEFAULT_MEDIAN_WINDOW, DEFAULT_WINDOW_HALF_WIDTH, MINUTES_PER_DAY};
use crate::error::ComputeError;
use crate::forecast::{
    ForecastBounds, ForecastOptions, DEFAULT_BLEND_WEIGHT, DEFAULT_EWMA_ALPHA,
    DEFAULT_FORECAST_WINDOW,
};
use crate::types::{CorrelationMethod, FieldId};
use serde::{Deserialize, Serialize};

/// Chronological order of the annotated weeks in a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Configuration for one trend computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Trailing buckets in the rolling average
    pub rolling_window: usize,
    /// Relative change (percent) below which a week is flat
    pub materiality_threshold_pct: f64,
    /// Trailing buckets used by the forecaster
    pub forecast_window: usize,
    /// EWMA smoothing factor (0-1]
    pub ewma_alpha: f64,
    /// Regression weight in the forecast blend [0-1]
    pub blend_weight: f64,
    /// Trailing days in the rolling circular median
    pub circular_median_window: usize,
    /// Half width of the typical clock window (minutes)
    pub clock_window_half_width_minutes: f64,
    /// Emit empty buckets for weeks without data
    pub fill_gaps: bool,
    pub order: SortOrder,
    pub correlation_method: CorrelationMethod,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            rolling_window: DEFAULT_ROLLING_WINDOW,
            materiality_threshold_pct: DEFAULT_MATERIALITY_PCT,
            forecast_window: DEFAULT_FORECAST_WINDOW,
            ewma_alpha: DEFAULT_EWMA_ALPHA,
            blend_weight: DEFAULT_BLEND_WEIGHT,
            circular_median_window: DEFAULT_MEDIAN_WINDOW,
            clock_window_half_width_minutes: DEFAULT_WINDOW_HALF_WIDTH,
            fill_gaps: true,
            order: SortOrder::Ascending,
            correlation_method: CorrelationMethod::Pearson,
        }
    }
}

impl TrendConfig {
    /// Parse and validate a JSON config; absent keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range settings
    pub fn validate(&self) -> Result<(), ComputeError> {
        let windows = [
            ("rolling_window", self.rolling_window),
            ("forecast_window", self.forecast_window),
            ("circular_median_window", self.circular_median_window),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ComputeError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }

        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(ComputeError::InvalidConfig(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return Err(ComputeError::InvalidConfig(format!(
                "blend_weight must be in [0, 1], got {}",
                self.blend_weight
            )));
        }
        if !(self.materiality_threshold_pct.is_finite() && self.materiality_threshold_pct >= 0.0) {
            return Err(ComputeError::InvalidConfig(format!(
                "materiality_threshold_pct must be a non-negative number, got {}",
                self.materiality_threshold_pct
            )));
        }
        let half_day = MINUTES_PER_DAY / 2.0;
        if !(0.0..=half_day).contains(&self.clock_window_half_width_minutes) {
            return Err(ComputeError::InvalidConfig(format!(
                "clock_window_half_width_minutes must be in [0, {half_day}], got {}",
                self.clock_window_half_width_minutes
            )));
        }
        Ok(())
    }

    /// Forecast options for a field.
    ///
    /// Linear fields are bounded below by zero. Clock fields are left
    /// unbounded; their forecasts are wrapped onto the clock instead.
    pub fn forecast_options(&self, field: FieldId) -> ForecastOptions {
        let bounds = if field.is_clock_time() {
            ForecastBounds::unbounded()
        } else {
            ForecastBounds::non_negative()
        };
        ForecastOptions {
            window: self.forecast_window,
            ewma_alpha: self.ewma_alpha,
            blend_weight: self.blend_weight,
            bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TrendConfig::default();
        assert_eq!(config.rolling_window, 4);
        assert_eq!(config.forecast_window, 6);
        assert_eq!(config.order, SortOrder::Ascending);
        assert!(config.fill_gaps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            TrendConfig::from_json(r#"{"rolling_window": 8, "order": "descending", "correlation_method": "spearman"}"#)
                .unwrap();

        assert_eq!(config.rolling_window, 8);
        assert_eq!(config.order, SortOrder::Descending);
        assert_eq!(config.correlation_method, CorrelationMethod::Spearman);
        assert_eq!(config.blend_weight, DEFAULT_BLEND_WEIGHT);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        for json in [
            r#"{"rolling_window": 0}"#,
            r#"{"ewma_alpha": 0.0}"#,
            r#"{"blend_weight": 1.5}"#,
            r#"{"materiality_threshold_pct": -1.0}"#,
            r#"{"clock_window_half_width_minutes": 800.0}"#,
        ] {
            let result = TrendConfig::from_json(json);
            assert!(matches!(result, Err(ComputeError::InvalidConfig(_))), "{json}");
        }

        assert!(matches!(
            TrendConfig::from_json("{not json"),
            Err(ComputeError::JsonError(_))
        ));
    }

    #[test]
    fn test_forecast_options_bounds() {
        let config = TrendConfig::default();
        assert_eq!(
            config.forecast_options(FieldId::StepCount).bounds,
            ForecastBounds::non_negative()
        );
        assert_eq!(
            config.forecast_options(FieldId::SleepOnset).bounds,
            ForecastBounds::unbounded()
        );
        assert_eq!(config.forecast_options(FieldId::DistanceKm).window, 6);
    }
}
