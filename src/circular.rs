//! Circular statistics for clock-time values
//!
//! Sleep onset and wake times live on a 24h circle: 23:50 and 00:10 are twenty
//! minutes apart, not twenty-three hours. Every value here is minutes since
//! midnight in `[0, 1440)`, and every statistic is computed on the circle.

use crate::types::{ClockTimeSummary, ClockWindow};
use chrono::Timelike;
use std::f64::consts::TAU;

/// Minutes in a day
pub const MINUTES_PER_DAY: f64 = 1440.0;

/// Default trailing window for the rolling circular median (days)
pub const DEFAULT_MEDIAN_WINDOW: usize = 7;

/// Default half width of the typical clock window (minutes)
pub const DEFAULT_WINDOW_HALF_WIDTH: f64 = 30.0;

/// Resultant vectors shorter than this have no meaningful direction
const MIN_RESULTANT_LENGTH: f64 = 1e-9;

/// Results are snapped to this grid to absorb trigonometric noise
const SNAP_RESOLUTION: f64 = 1e-6;

/// Wrap any minute value into `[0, 1440)`
pub fn wrap_minutes(minutes: f64) -> f64 {
    let snapped = (minutes.rem_euclid(MINUTES_PER_DAY) / SNAP_RESOLUTION).round() * SNAP_RESOLUTION;
    if snapped >= MINUTES_PER_DAY {
        0.0
    } else {
        snapped
    }
}

/// Signed shortest offset from `from` to `to`, in `[-720, 720)`
pub fn signed_offset(from: f64, to: f64) -> f64 {
    (to - from + MINUTES_PER_DAY / 2.0).rem_euclid(MINUTES_PER_DAY) - MINUTES_PER_DAY / 2.0
}

/// Shortest distance between two clock times, in `[0, 720]`
pub fn circular_distance(a: f64, b: f64) -> f64 {
    signed_offset(a, b).abs()
}

/// Minutes since midnight of a time-of-day
pub fn minutes_of_day<T: Timelike>(time: &T) -> f64 {
    time.hour() as f64 * 60.0 + time.minute() as f64 + time.second() as f64 / 60.0
}

/// Format minutes since midnight as `HH:MM`
pub fn format_clock(minutes: f64) -> String {
    let total = wrap_minutes(minutes.round()) as u32 % 1440;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Circular mean of clock times.
///
/// Each value becomes a unit vector on the 1440-minute circle; the mean is the
/// direction of the averaged vector. Returns `None` for empty input and for
/// inputs whose vectors cancel out (e.g. 00:00 and 12:00).
pub fn circular_mean(minutes_of_day: &[f64]) -> Option<f64> {
    let values: Vec<f64> = minutes_of_day.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let (sum_sin, sum_cos) = values.iter().fold((0.0, 0.0), |(s, c), &m| {
        let angle = m / MINUTES_PER_DAY * TAU;
        (s + angle.sin(), c + angle.cos())
    });
    let (mean_sin, mean_cos) = (sum_sin / n, sum_cos / n);

    if mean_sin.hypot(mean_cos) < MIN_RESULTANT_LENGTH {
        return None;
    }

    let angle = mean_sin.atan2(mean_cos);
    Some(wrap_minutes(angle / TAU * MINUTES_PER_DAY))
}

/// Trailing circular median over a series with gaps.
///
/// For each position the trailing `window` values (nulls skipped) are
/// re-centered on their own circular mean, a linear median is taken of the
/// signed offsets, and the result is translated back onto the circle.
pub fn circular_rolling_median(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);

    (0..series.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let values: Vec<f64> = series[start..=i]
                .iter()
                .flatten()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            circular_median(&values)
        })
        .collect()
}

/// Circular median of a set of clock times
pub fn circular_median(values: &[f64]) -> Option<f64> {
    let latest = *values.last()?;
    // Balanced inputs have no mean direction; anchor on the latest value.
    let center = circular_mean(values).unwrap_or(latest);

    let mut offsets: Vec<f64> = values.iter().map(|&v| signed_offset(center, v)).collect();
    offsets.sort_by(|a, b| a.total_cmp(b));

    let mid = offsets.len() / 2;
    let median_offset = if offsets.len() % 2 == 0 {
        (offsets[mid - 1] + offsets[mid]) / 2.0
    } else {
        offsets[mid]
    };

    Some(wrap_minutes(center + median_offset))
}

/// Unroll a chronological clock series so consecutive values never jump
/// across midnight.
///
/// Each value is placed at the shortest signed offset from its predecessor,
/// so `[1430, 10]` becomes `[1430, 1450]`. Wrap results back with
/// `wrap_minutes`.
pub fn unwrap_series(values: &[f64]) -> Vec<f64> {
    let mut unrolled: Vec<f64> = Vec::with_capacity(values.len());
    for &value in values {
        let next = match unrolled.last() {
            Some(&previous) => previous + signed_offset(previous, value),
            None => value,
        };
        unrolled.push(next);
    }
    unrolled
}

/// Symmetric clock window around a center, wrapping at midnight.
///
/// The half width is capped at 12 hours.
pub fn window_around(center: Option<f64>, half_width_minutes: f64) -> Option<ClockWindow> {
    let center = center.filter(|c| c.is_finite())?;
    let half = half_width_minutes.abs().min(MINUTES_PER_DAY / 2.0);

    Some(ClockWindow {
        start: wrap_minutes(center - half),
        end: wrap_minutes(center + half),
    })
}

impl ClockWindow {
    /// True when the window crosses midnight
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Check if a clock time falls inside the window (inclusive)
    pub fn contains(&self, minutes: f64) -> bool {
        let m = wrap_minutes(minutes);
        if self.wraps_midnight() {
            m >= self.start || m <= self.end
        } else {
            m >= self.start && m <= self.end
        }
    }
}

impl ClockTimeSummary {
    /// Summarize a chronological daily series of clock times
    pub fn from_daily_series(series: &[Option<f64>], median_window: usize, half_width: f64) -> Self {
        let present: Vec<f64> = series.iter().flatten().copied().collect();
        let mean = circular_mean(&present);
        let rolling_median = circular_rolling_median(series, median_window)
            .into_iter()
            .rev()
            .flatten()
            .next();

        Self {
            mean,
            rolling_median,
            typical_window: window_around(mean, half_width),
            days: present.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_circular_mean_wraps_midnight() {
        // 23:50 and 00:10 average to midnight, not noon
        let mean = circular_mean(&[1430.0, 10.0]).unwrap();
        assert!(circular_distance(mean, 0.0) < 1e-6);
        assert!(circular_distance(mean, 720.0) > 700.0);
    }

    #[test]
    fn test_circular_mean_plain_values() {
        let mean = circular_mean(&[1380.0, 1400.0, 1420.0]).unwrap();
        assert!((mean - 1400.0).abs() < 1e-6);
    }

    #[test]
    fn test_circular_mean_empty_and_balanced() {
        assert_eq!(circular_mean(&[]), None);
        assert_eq!(circular_mean(&[0.0, 720.0]), None);
    }

    #[test]
    fn test_circular_mean_in_range() {
        let mean = circular_mean(&[1439.0, 1439.5]).unwrap();
        assert!((0.0..MINUTES_PER_DAY).contains(&mean));
        assert!((mean - 1439.25).abs() < 1e-6);
    }

    #[test]
    fn test_rolling_median_across_midnight() {
        let series = vec![Some(1430.0), Some(5.0), None, Some(15.0)];
        let medians = circular_rolling_median(&series, 3);

        assert_eq!(medians.len(), 4);
        assert!((medians[0].unwrap() - 1430.0).abs() < 1e-6);
        // 23:50 and 00:05 -> midpoint 23:57:30
        assert!(circular_distance(medians[1].unwrap(), 1437.5) < 1e-6);
        // Trailing window [00:05, null, 00:15] -> 00:10
        assert!(circular_distance(medians[3].unwrap(), 10.0) < 1e-6);
    }

    #[test]
    fn test_rolling_median_resists_outlier() {
        let series = vec![Some(1420.0), Some(1425.0), Some(300.0), Some(1430.0), Some(5.0)];
        let medians = circular_rolling_median(&series, 5);
        let last = medians[4].unwrap();
        // Median lands among the late-evening cluster, not dragged to 05:00
        assert!(circular_distance(last, 1430.0) <= 10.0);
    }

    #[test]
    fn test_rolling_median_all_null() {
        let medians = circular_rolling_median(&[None, None], 3);
        assert_eq!(medians, vec![None, None]);
    }

    #[test]
    fn test_window_around_wraps() {
        let window = window_around(Some(10.0), 30.0).unwrap();
        assert!((window.start - 1420.0).abs() < 1e-6);
        assert!((window.end - 40.0).abs() < 1e-6);
        assert!(window.wraps_midnight());
        assert!(window.contains(1435.0));
        assert!(window.contains(20.0));
        assert!(!window.contains(60.0));

        let plain = window_around(Some(600.0), 15.0).unwrap();
        assert!(!plain.wraps_midnight());
        assert!(plain.contains(610.0));

        assert_eq!(window_around(None, 30.0), None);
    }

    #[test]
    fn test_clock_helpers() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(1430.0), "23:50");
        assert_eq!(format_clock(1439.8), "00:00");
        assert!((signed_offset(1430.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((signed_offset(10.0, 1430.0) + 20.0).abs() < 1e-9);

        let time = NaiveTime::from_hms_opt(22, 45, 30).unwrap();
        assert!((minutes_of_day(&time) - 1365.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_time_summary() {
        let series = vec![Some(1410.0), None, Some(1430.0), Some(10.0)];
        let summary = ClockTimeSummary::from_daily_series(&series, 7, 30.0);

        assert_eq!(summary.days, 3);
        let mean = summary.mean.unwrap();
        assert!(circular_distance(mean, 1430.0) < 0.1);
        assert!(summary.rolling_median.is_some());
        assert!(summary.typical_window.unwrap().contains(mean));
    }

    #[test]
    fn test_unwrap_series_across_midnight() {
        assert_eq!(unwrap_series(&[1430.0, 10.0, 20.0]), vec![1430.0, 1450.0, 1460.0]);
        assert_eq!(unwrap_series(&[10.0, 1430.0]), vec![10.0, -10.0]);
        assert!(unwrap_series(&[]).is_empty());
        assert!((wrap_minutes(1460.0) - 20.0).abs() < 1e-9);
    }
}
