//! Summary Statistics
//!
//! Mean and spread over repeat totals. Standard deviation is the sample
//! (Bessel-corrected) estimator; a single sample has a spread of exactly 0.0
//! so single-repeat runs still serialize as plain numbers.

use crate::StatsError;

/// Mean and spread of a sample set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread {
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation (0.0 for a single sample)
    pub std_dev: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Number of samples
    pub count: usize,
}

impl Spread {
    /// Coefficient of variation (relative stddev, percent)
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (self.std_dev / self.mean) * 100.0
        }
    }

    /// Check if the samples look stable (CV below `cv_threshold` percent)
    pub fn is_stable(&self, cv_threshold: f64) -> bool {
        self.coefficient_of_variation() < cv_threshold
    }
}

/// Mean and sample standard deviation of `samples`.
///
/// Fails with [`StatsError::EmptyInput`] on an empty slice.
pub fn aggregate(samples: &[f64]) -> Result<(f64, f64), StatsError> {
    if samples.is_empty() {
        return Err(StatsError::EmptyInput);
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;

    let std_dev = if samples.len() < 2 {
        0.0
    } else {
        let variance =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
        variance.sqrt()
    };

    Ok((mean, std_dev))
}

/// Full [`Spread`] of `samples`, including extremes.
pub fn describe(samples: &[f64]) -> Result<Spread, StatsError> {
    let (mean, std_dev) = aggregate(samples)?;

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(Spread {
        mean,
        std_dev,
        min,
        max,
        count: samples.len(),
    })
}

/// Speedup of `value` relative to `baseline` (`baseline / value`).
///
/// `None` when either side is not a positive finite number.
pub fn speedup(baseline: f64, value: f64) -> Option<f64> {
    if baseline > 0.0 && value > 0.0 && baseline.is_finite() && value.is_finite() {
        Some(baseline / value)
    } else {
        None
    }
}
