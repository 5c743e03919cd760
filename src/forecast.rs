//! Short-horizon forecasting
//!
//! Forecasts the next value of a bucket series by blending two estimates over
//! a trailing window:
//! - Ordinary least squares of value against a zero-based index
//! - Exponentially weighted moving average seeded with the first value
//!
//! Confidence is labelled from the regression's R².

use crate::types::{Confidence, ForecastResult, Regression};
use serde::{Deserialize, Serialize};

/// Default number of trailing points used
pub const DEFAULT_FORECAST_WINDOW: usize = 6;

/// Default EWMA smoothing factor
pub const DEFAULT_EWMA_ALPHA: f64 = 0.5;

/// Default weight of the regression forecast in the blend
pub const DEFAULT_BLEND_WEIGHT: f64 = 0.5;

/// Fewest points for which a regression forecast is produced
pub const MIN_REGRESSION_POINTS: usize = 3;

/// R² at or above which confidence is high
pub const HIGH_CONFIDENCE_R2: f64 = 0.75;

/// R² at or above which confidence is medium
pub const MEDIUM_CONFIDENCE_R2: f64 = 0.45;

/// Substitute for a vanishing normal-equation denominator
const DENOMINATOR_EPSILON: f64 = 1e-9;

/// Optional clamp applied to every forecast output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ForecastBounds {
    /// No bounds
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounded below by zero, for counts and distances
    pub fn non_negative() -> Self {
        Self {
            min: Some(0.0),
            max: None,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}

/// Forecast tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastOptions {
    /// Trailing points used
    pub window: usize,
    /// EWMA smoothing factor (0-1)
    pub ewma_alpha: f64,
    /// Regression weight in the blend (0-1)
    pub blend_weight: f64,
    /// Output clamp
    pub bounds: ForecastBounds,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_FORECAST_WINDOW,
            ewma_alpha: DEFAULT_EWMA_ALPHA,
            blend_weight: DEFAULT_BLEND_WEIGHT,
            bounds: ForecastBounds::unbounded(),
        }
    }
}

impl ForecastOptions {
    pub fn with_bounds(mut self, bounds: ForecastBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

/// Forecaster for bucket series
pub struct Forecaster;

impl Forecaster {
    /// Forecast the next value of a series.
    ///
    /// Non-finite values are dropped before windowing. Fewer than
    /// `MIN_REGRESSION_POINTS` points yield no regression forecast and
    /// `Confidence::Insufficient`; the blend then falls back to the EWMA.
    pub fn forecast(series: &[f64], options: &ForecastOptions) -> ForecastResult {
        let finite: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
        let start = finite.len().saturating_sub(options.window.max(1));
        let window = &finite[start..];

        let regression = linear_regression(window);
        let regression_forecast = if window.len() >= MIN_REGRESSION_POINTS {
            let next_index = window.len() as f64;
            Some(regression.slope * next_index + regression.intercept)
        } else {
            None
        };
        let ewma = ewma(window, options.ewma_alpha);

        let blended = match (regression_forecast, ewma) {
            (Some(r), Some(e)) => Some(options.blend_weight * r + (1.0 - options.blend_weight) * e),
            (Some(r), None) => Some(r),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        };

        let bounds = options.bounds;
        ForecastResult {
            regression,
            regression_forecast: regression_forecast.map(|v| bounds.clamp(v)),
            ewma: ewma.map(|v| bounds.clamp(v)),
            blended: blended.map(|v| bounds.clamp(v)),
            confidence: confidence_for(window.len(), regression.r_squared),
            points_used: window.len(),
        }
    }
}

/// Least squares fit of `values[i]` against `i`.
///
/// Uses the closed-form normal equations; a vanishing denominator is replaced
/// by a small epsilon so single-point input yields a flat line. R² is
/// `1 - SSres/SStot`, with a constant series scoring 0.
pub fn linear_regression(values: &[f64]) -> Regression {
    if values.is_empty() {
        return Regression::default();
    }

    let n = values.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_xx) = values.iter().enumerate().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sxx), (i, &y)| {
            let x = i as f64;
            (sx + x, sy + y, sxy + x * y, sxx + x * x)
        },
    );

    let mut denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < DENOMINATOR_EPSILON {
        denominator = DENOMINATOR_EPSILON;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean = sum_y / n;
    let (ss_res, ss_tot) = values.iter().enumerate().fold((0.0, 0.0), |(res, tot), (i, &y)| {
        let fitted = slope * i as f64 + intercept;
        (res + (y - fitted).powi(2), tot + (y - mean).powi(2))
    });
    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Regression {
        slope,
        intercept,
        r_squared,
    }
}

/// Exponentially weighted moving average, seeded with the first value
pub fn ewma(values: &[f64], alpha: f64) -> Option<f64> {
    let (first, rest) = values.split_first()?;
    Some(rest.iter().fold(*first, |acc, &v| alpha * v + (1.0 - alpha) * acc))
}

/// Confidence label for a fit over `points` values
pub fn confidence_for(points: usize, r_squared: f64) -> Confidence {
    if points < MIN_REGRESSION_POINTS {
        Confidence::Insufficient
    } else if r_squared >= HIGH_CONFIDENCE_R2 {
        Confidence::High
    } else if r_squared >= MEDIUM_CONFIDENCE_R2 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}
