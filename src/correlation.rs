//! Correlation engine
//!
//! Pairwise correlation across named metric series sampled from the same
//! buckets. Series must be pre-aligned: same length, same bucket order.
//!
//! A pair involving a constant series has no defined correlation. Its entry is
//! reported as `0.0` with `defined = false`, which also applies to the diagonal
//! of a constant series.

use crate::error::ComputeError;
use crate::types::{CorrelationMatrix, CorrelationMethod};
use tracing::debug;

/// Decimal places used for display rounding
pub const DISPLAY_DECIMALS: u32 = 2;

/// Pearson correlation of two equal-length series.
///
/// Returns `None` when either series is constant, shorter than two points, or
/// contains non-finite values.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 || is_constant(a) || is_constant(b) {
        return None;
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let (cov, var_a, var_b) = a.iter().zip(b).fold((0.0, 0.0, 0.0), |(c, va, vb), (&x, &y)| {
        let da = x - mean_a;
        let db = y - mean_b;
        (c + da * db, va + da * da, vb + db * db)
    });

    let denominator = (var_a * var_b).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return None;
    }

    let r = cov / denominator;
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Spearman rank correlation: Pearson over average-tie ranks
pub fn spearman(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    pearson(&ranks(a), &ranks(b))
}

/// 1-based ranks, ties sharing the average of their positions
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let average = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = average;
        }
        start = end;
    }
    ranks
}

/// Build the pairwise matrix for aligned named series.
///
/// Fails with `ComputeError::Precondition` when series lengths differ.
pub fn correlation_matrix(
    series: &[(String, Vec<f64>)],
    method: CorrelationMethod,
) -> Result<CorrelationMatrix, ComputeError> {
    let sample_size = series.first().map_or(0, |(_, values)| values.len());
    if let Some((name, values)) = series.iter().find(|(_, values)| values.len() != sample_size) {
        return Err(ComputeError::Precondition(format!(
            "series '{}' has {} samples, expected {}",
            name,
            values.len(),
            sample_size
        )));
    }

    let n = series.len();
    let mut matrix = vec![vec![0.0; n]; n];
    let mut defined = vec![vec![false; n]; n];

    for i in 0..n {
        let varies = sample_size >= 2 && !is_constant(&series[i].1);
        matrix[i][i] = if varies { 1.0 } else { 0.0 };
        defined[i][i] = varies;

        for j in (i + 1)..n {
            let r = match method {
                CorrelationMethod::Pearson => pearson(&series[i].1, &series[j].1),
                CorrelationMethod::Spearman => spearman(&series[i].1, &series[j].1),
            };
            if let Some(r) = r {
                matrix[i][j] = r;
                matrix[j][i] = r;
                defined[i][j] = true;
                defined[j][i] = true;
            }
        }
    }

    debug!(metrics = n, sample_size, ?method, "correlation matrix computed");

    Ok(CorrelationMatrix {
        metric_names: series.iter().map(|(name, _)| name.clone()).collect(),
        matrix,
        defined,
        method,
        sample_size,
    })
}

impl CorrelationMatrix {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.metric_names.iter().position(|m| m == name)
    }

    /// Correlation between two named metrics, `None` when undefined or unknown
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        self.defined[i][j].then(|| self.matrix[i][j])
    }

    /// Copy with every value rounded to `decimals` places, for display
    pub fn rounded(&self, decimals: u32) -> Self {
        let factor = 10f64.powi(decimals as i32);
        let mut copy = self.clone();
        for row in &mut copy.matrix {
            for value in row.iter_mut() {
                *value = (*value * factor).round() / factor;
            }
        }
        copy
    }

    /// Defined off-diagonal pairs with `|r| >= min_abs`, strongest first
    pub fn strongest_pairs(&self, min_abs: f64) -> Vec<(String, String, f64)> {
        let n = self.metric_names.len();
        let mut pairs: Vec<(String, String, f64)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .filter(|&(i, j)| self.defined[i][j] && self.matrix[i][j].abs() >= min_abs)
            .map(|(i, j)| {
                (
                    self.metric_names[i].clone(),
                    self.metric_names[j].clone(),
                    self.matrix[i][j],
                )
            })
            .collect();
        pairs.sort_by(|a, b| b.2.abs().total_cmp(&a.2.abs()));
        pairs
    }
}

fn is_constant(values: &[f64]) -> bool {
    match values.split_first() {
        Some((first, rest)) => rest.iter().all(|v| v == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn named(name: &str, values: &[f64]) -> (String, Vec<f64>) {
        (name.to_string(), values.to_vec())
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let a = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&a, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_is_undefined() {
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]), None);

        let matrix = correlation_matrix(
            &[named("steps", &[1.0, 2.0, 3.0]), named("flat", &[5.0, 5.0, 5.0])],
            CorrelationMethod::Pearson,
        )
        .unwrap();

        assert_eq!(matrix.matrix, vec![vec![1.0, 0.0], vec![0.0, 0.0]]);
        assert_eq!(matrix.defined, vec![vec![true, false], vec![false, false]]);
        assert_eq!(matrix.get("steps", "flat"), None);
        assert_eq!(matrix.get("steps", "steps"), Some(1.0));
    }

    #[test]
    fn test_misaligned_series_rejected() {
        let result = correlation_matrix(
            &[named("a", &[1.0, 2.0, 3.0]), named("b", &[1.0, 2.0])],
            CorrelationMethod::Pearson,
        );
        assert!(matches!(result, Err(ComputeError::Precondition(_))));
    }

    #[test]
    fn test_empty_input() {
        let matrix = correlation_matrix(&[], CorrelationMethod::Pearson).unwrap();
        assert!(matrix.metric_names.is_empty());
        assert_eq!(matrix.sample_size, 0);
    }

    #[test]
    fn test_spearman_monotonic_and_ties() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let cubed: Vec<f64> = x.iter().map(|v: &f64| v.powi(3)).collect();
        assert!((spearman(&x, &cubed).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&x, &cubed).unwrap() < 1.0);

        assert_eq!(ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_strongest_pairs_and_rounding() {
        let matrix = correlation_matrix(
            &[
                named("steps", &[1.0, 2.0, 3.0, 4.0]),
                named("distance", &[1.1, 2.0, 3.2, 3.9]),
                named("rhr", &[60.0, 58.0, 61.0, 59.0]),
            ],
            CorrelationMethod::Pearson,
        )
        .unwrap();

        let pairs = matrix.strongest_pairs(0.9);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "steps");
        assert_eq!(pairs[0].1, "distance");

        let rounded = matrix.rounded(DISPLAY_DECIMALS);
        for row in &rounded.matrix {
            for value in row {
                assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-9);
            }
        }
        assert_eq!(rounded.defined, matrix.defined);
    }

    proptest! {
        #[test]
        fn prop_matrix_symmetric_and_bounded(
            rows in prop::collection::vec((-1e4f64..1e4, -1e4f64..1e4, -1e4f64..1e4), 2..16),
            spearman_method in any::<bool>(),
        ) {
            let method = if spearman_method { CorrelationMethod::Spearman } else { CorrelationMethod::Pearson };
            let series = vec![
                ("a".to_string(), rows.iter().map(|r| r.0).collect::<Vec<_>>()),
                ("b".to_string(), rows.iter().map(|r| r.1).collect::<Vec<_>>()),
                ("c".to_string(), rows.iter().map(|r| r.2).collect::<Vec<_>>()),
            ];
            let matrix = correlation_matrix(&series, method).unwrap();

            for i in 0..3 {
                for j in 0..3 {
                    prop_assert_eq!(matrix.matrix[i][j], matrix.matrix[j][i]);
                    prop_assert!((-1.0..=1.0).contains(&matrix.matrix[i][j]));
                }
                if matrix.defined[i][i] {
                    prop_assert_eq!(matrix.matrix[i][i], 1.0);
                }
            }
        }

        #[test]
        fn prop_self_correlation_is_one(values in prop::collection::vec(-1e4f64..1e4, 2..32)) {
            prop_assume!(!is_constant(&values));
            let r = pearson(&values, &values).unwrap();
            prop_assert!((r - 1.0).abs() < 1e-9);
        }
    }
}
