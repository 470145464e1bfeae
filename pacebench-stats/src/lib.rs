#![warn(missing_docs)]
//! pacebench Statistical Engine
//!
//! Small, pure helpers shared by the measurement engine and the cross-run
//! aggregator:
//! - Mean and sample standard deviation over repeat totals
//! - Extremes and coefficient of variation
//! - Percentiles by linear interpolation
//! - Speedup ratios against a baseline

mod percentiles;
mod summary;

pub use percentiles::{compute_percentile, median};
pub use summary::{Spread, aggregate, describe, speedup};

use thiserror::Error;

/// Errors raised by the statistics helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatsError {
    /// No samples were supplied
    #[error("cannot compute statistics over an empty sample set")]
    EmptyInput,
}
