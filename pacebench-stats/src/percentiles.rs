//! Percentile Computation
//!
//! Used by the cross-run summaries to report a median next to the mean, so a
//! single noisy document does not hide behind an average.

use crate::StatsError;

/// Compute a single percentile from samples.
///
/// Uses linear interpolation between nearest ranks. `percentile` is clamped
/// to `[0, 100]`.
///
/// # Examples
///
/// ```
/// # use pacebench_stats::compute_percentile;
/// let walls = [0.8, 1.0, 1.2];
/// assert_eq!(compute_percentile(&walls, 50.0).unwrap(), 1.0);
/// ```
pub fn compute_percentile(samples: &[f64], percentile: f64) -> Result<f64, StatsError> {
    match samples {
        [] => Err(StatsError::EmptyInput),
        [only] => Ok(*only),
        _ => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let n = sorted.len();
            let p = percentile.clamp(0.0, 100.0) / 100.0;

            let rank = p * (n - 1) as f64;
            let lower_idx = rank.floor() as usize;
            let upper_idx = (lower_idx + 1).min(n - 1);
            let fraction = rank - lower_idx as f64;

            Ok(sorted[lower_idx] + fraction * (sorted[upper_idx] - sorted[lower_idx]))
        }
    }
}

/// Median of the samples (50th percentile).
pub fn median(samples: &[f64]) -> Result<f64, StatsError> {
    compute_percentile(samples, 50.0)
}
