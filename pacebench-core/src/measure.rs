//! Measurement Engine
//!
//! Batched wall-clock timing. Each repeat calls the workload `iterations`
//! times back to back and records one elapsed duration for the whole batch,
//! so per-call timer overhead is amortized over the batch.

use crate::catalog::{WorkloadCase, WorkloadError};
use crate::{EngineError, panic_message};
use pacebench_stats::{StatsError, aggregate};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

/// Relative tolerance when checking stored statistics against their runs
pub const DERIVED_TOLERANCE: f64 = 1e-9;

/// Timing of one case across all repeats. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Catalog name of the measured case
    pub case_name: String,
    /// Workload calls per repeat
    pub iterations: u32,
    /// Number of timed batches
    pub repeat: u32,
    /// Elapsed seconds of each batch, in execution order
    pub runs: Vec<f64>,
    /// Mean of `runs`
    pub mean_total: f64,
    /// Sample standard deviation of `runs` (0.0 for a single repeat)
    pub stddev_total: f64,
    /// `mean_total / iterations`
    pub mean_per_iteration: f64,
    /// `stddev_total / iterations`
    pub stddev_per_iteration: f64,
}

impl RunResult {
    /// Derive every statistic from raw batch durations
    pub fn from_runs(
        case_name: impl Into<String>,
        iterations: u32,
        runs: Vec<f64>,
    ) -> Result<Self, StatsError> {
        let (mean_total, stddev_total) = aggregate(&runs)?;
        let per = f64::from(iterations.max(1));
        Ok(Self {
            case_name: case_name.into(),
            iterations,
            repeat: runs.len() as u32,
            runs,
            mean_total,
            stddev_total,
            mean_per_iteration: mean_total / per,
            stddev_per_iteration: stddev_total / per,
        })
    }

    /// Structural invariants a persisted result must satisfy.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.iterations == 0 {
            return Err(format!("case `{}` has zero iterations", self.case_name));
        }
        if self.repeat == 0 {
            return Err(format!("case `{}` has zero repeats", self.case_name));
        }
        if self.runs.len() != self.repeat as usize {
            return Err(format!(
                "case `{}` has {} runs but repeat = {}",
                self.case_name,
                self.runs.len(),
                self.repeat
            ));
        }
        if let Some(bad) = self.runs.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(format!("case `{}` has an invalid run time {bad}", self.case_name));
        }
        if !self.stddev_total.is_finite() || self.stddev_total < 0.0 {
            return Err(format!(
                "case `{}` has an invalid stddev {}",
                self.case_name, self.stddev_total
            ));
        }

        let expected = Self::from_runs(self.case_name.as_str(), self.iterations, self.runs.clone())
            .map_err(|e| format!("case `{}`: {e}", self.case_name))?;
        if !self.approx_eq(&expected, DERIVED_TOLERANCE) {
            return Err(format!(
                "case `{}` statistics do not match its runs (mean_total {} vs {})",
                self.case_name, self.mean_total, expected.mean_total
            ));
        }
        Ok(())
    }

    /// Field-wise equality with floats compared to within `tolerance`
    /// (relative for large magnitudes, absolute near zero)
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0);

        self.case_name == other.case_name
            && self.iterations == other.iterations
            && self.repeat == other.repeat
            && self.runs.len() == other.runs.len()
            && self.runs.iter().zip(&other.runs).all(|(a, b)| close(*a, *b))
            && close(self.mean_total, other.mean_total)
            && close(self.stddev_total, other.stddev_total)
            && close(self.mean_per_iteration, other.mean_per_iteration)
            && close(self.stddev_per_iteration, other.stddev_per_iteration)
    }
}

/// Time `case` at `param`: `repeat` batches of `iterations` calls each.
///
/// The first workload error or panic aborts the case; nothing is retried.
pub fn measure(
    case: &WorkloadCase,
    param: u64,
    iterations: u32,
    repeat: u32,
) -> Result<RunResult, EngineError> {
    EngineError::ensure_positive("iterations", iterations.into())?;
    EngineError::ensure_positive("repeat", repeat.into())?;

    let failed = |message: String| EngineError::WorkloadExecution {
        case: case.name.to_string(),
        message,
    };

    let mut runs = Vec::with_capacity(repeat as usize);
    for round in 0..repeat {
        let start = Instant::now();
        let batch = catch_unwind(AssertUnwindSafe(|| {
            for _ in 0..iterations {
                black_box(case.call(black_box(param))?);
            }
            Ok::<(), WorkloadError>(())
        }));
        let elapsed = start.elapsed().as_secs_f64();

        match batch {
            Ok(Ok(())) => runs.push(elapsed),
            Ok(Err(err)) => return Err(failed(err.to_string())),
            Err(panic) => return Err(failed(format!("panicked: {}", panic_message(panic.as_ref())))),
        }
        tracing::trace!(case = case.name, round, elapsed, "batch finished");
    }

    let result = RunResult::from_runs(case.name, iterations, runs)?;
    tracing::debug!(
        case = case.name,
        mean_total = result.mean_total,
        stddev_total = result.stddev_total,
        "case measured"
    );
    Ok(result)
}

/// Measure every case at its default parameter, in order.
///
/// `on_done` is called after each case, for progress reporting.
pub fn measure_all(
    cases: &[WorkloadCase],
    iterations: u32,
    repeat: u32,
    mut on_done: impl FnMut(&RunResult),
) -> Result<Vec<RunResult>, EngineError> {
    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        tracing::info!(case = case.name, param = case.default_param, "measuring");
        let result = measure(case, case.default_param, iterations, repeat)?;
        on_done(&result);
        results.push(result);
    }
    Ok(results)
}
