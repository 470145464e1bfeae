//! Micro-benchmark runner
//!
//! Measures the selected catalog cases one after another and assembles the
//! document for this runtime.

use indicatif::{ProgressBar, ProgressStyle};
use pacebench_core::{
    Catalog, EngineError, RunResult, RuntimeContext, Suite, WorkloadCase, measure_all,
};
use pacebench_report::BenchmarkDocument;
use regex::Regex;

/// Micro cases of `catalog` whose name matches `filter`, in catalog order
pub fn select_micro_cases(catalog: &Catalog, filter: Option<&Regex>) -> Vec<WorkloadCase> {
    catalog.select(Suite::Micro, filter)
}

/// Measure every selected micro case and build the document.
///
/// `on_done` sees each result as soon as its case finishes.
pub fn measure_catalog(
    catalog: &Catalog,
    ctx: &RuntimeContext,
    iterations: u32,
    repeat: u32,
    filter: Option<&Regex>,
    on_done: impl FnMut(&RunResult),
) -> Result<BenchmarkDocument, EngineError> {
    EngineError::ensure_positive("iterations", u64::from(iterations))?;
    EngineError::ensure_positive("repeat", u64::from(repeat))?;

    let cases = select_micro_cases(catalog, filter);
    tracing::info!(cases = cases.len(), iterations, repeat, runtime = %ctx.identity(), "starting micro run");
    let results = measure_all(&cases, iterations, repeat, on_done)?;
    Ok(BenchmarkDocument::new(ctx, iterations, repeat, results))
}

/// [`measure_catalog`] behind a terminal progress bar
pub fn measure_catalog_with_progress(
    catalog: &Catalog,
    ctx: &RuntimeContext,
    iterations: u32,
    repeat: u32,
    filter: Option<&Regex>,
) -> Result<BenchmarkDocument, EngineError> {
    let pb = ProgressBar::new(select_micro_cases(catalog, filter).len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let doc = measure_catalog(catalog, ctx, iterations, repeat, filter, |result| {
        pb.set_message(result.case_name.clone());
        pb.inc(1);
    });

    match &doc {
        Ok(_) => pb.finish_with_message("Complete"),
        Err(_) => pb.abandon_with_message("Aborted"),
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacebench_core::{FixedProbe, LockMode, ResultShape, WorkloadError};

    fn constant(_: u64) -> Result<i64, WorkloadError> {
        Ok(7)
    }

    fn broken(_: u64) -> Result<i64, WorkloadError> {
        Err(WorkloadError::Failed("broken".to_string()))
    }

    fn ctx() -> RuntimeContext {
        RuntimeContext::resolve("Rust", "test", &FixedProbe(LockMode::Parallel))
    }

    fn catalog() -> Catalog {
        Catalog::from_cases([
            WorkloadCase::new("alpha", "", constant, 1, ResultShape::Value, Suite::Micro),
            WorkloadCase::new("beta", "", constant, 1, ResultShape::Value, Suite::Micro),
            WorkloadCase::new("gamma", "", constant, 1, ResultShape::Value, Suite::Concurrency),
        ])
    }

    #[test]
    fn test_measures_only_matching_micro_cases() {
        let re = Regex::new("^(alpha|gamma)$").unwrap();
        let mut seen = Vec::new();
        let doc = measure_catalog(&catalog(), &ctx(), 2, 3, Some(&re), |r| {
            seen.push(r.case_name.clone())
        })
        .unwrap();

        assert_eq!(seen, vec!["alpha".to_string()]);
        assert_eq!(doc.cases.len(), 1);
        assert_eq!(doc.cases["alpha"].runs.len(), 3);
        assert_eq!(doc.iterations, 2);
    }

    #[test]
    fn test_zero_counts_are_rejected_before_running() {
        let mut calls = 0;
        let err = measure_catalog(&catalog(), &ctx(), 0, 3, None, |_| calls += 1).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { name: "iterations", .. }));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_failing_case_aborts_the_run() {
        let catalog = Catalog::from_cases([WorkloadCase::new(
            "broken",
            "",
            broken,
            1,
            ResultShape::Value,
            Suite::Micro,
        )]);
        assert!(matches!(
            measure_catalog(&catalog, &ctx(), 1, 1, None, |_| {}),
            Err(EngineError::WorkloadExecution { .. })
        ));
    }
}
