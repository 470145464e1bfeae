//! Terminal Rendering
//!
//! Plain-text tables for documents and summaries.

use crate::aggregate::{ConcurrencySummaryEntry, SummaryEntry};
use crate::document::{BenchmarkDocument, ConcurrencyDocument};
use pacebench_core::StrategyStatus;
use pacebench_stats::describe;

const RULE_WIDTH: usize = 72;

/// Repeat spread (coefficient of variation, percent) above which a case is
/// flagged as noisy
const NOISY_CV_PERCENT: f64 = 10.0;

fn heading(output: &mut String, title: &str) {
    output.push('\n');
    output.push_str(title);
    output.push('\n');
    output.push_str(&"=".repeat(RULE_WIDTH));
    output.push_str("\n\n");
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Micro results of a single document
pub fn format_benchmark_document(doc: &BenchmarkDocument) -> String {
    let mut output = String::new();
    heading(
        &mut output,
        &format!(
            "pacebench micro: {} ({} iterations x {} repeats)",
            doc.runtime, doc.iterations, doc.repeat
        ),
    );

    let width = doc.cases.keys().map(String::len).max().unwrap_or(20);
    output.push_str(&format!(
        "  {:<width$}  {:>12}  {:>12}  {:>12}  {:>12}  {:>7}  {:>12}\n",
        "Case", "mean total s", "stddev s", "min s", "max s", "CV %", "per iter s"
    ));
    output.push_str(&format!("  {}\n", "-".repeat(width + 81)));
    for (name, result) in &doc.cases {
        let (min, max, cv, noisy) = match describe(&result.runs) {
            Ok(spread) => (
                Some(spread.min),
                Some(spread.max),
                Some(spread.coefficient_of_variation()),
                !spread.is_stable(NOISY_CV_PERCENT),
            ),
            Err(_) => (None, None, None, false),
        };
        output.push_str(&format!(
            "  {:<width$}  {:>12.6}  {:>12.6}  {:>12}  {:>12}  {:>7}  {:>12.9}{}\n",
            name,
            result.mean_total,
            result.stddev_total,
            opt(min, 6),
            opt(max, 6),
            opt(cv, 1),
            result.mean_per_iteration,
            if noisy { "  noisy" } else { "" }
        ));
    }
    output
}

/// Strategy table of a single concurrency document
pub fn format_concurrency_document(doc: &ConcurrencyDocument) -> String {
    let mut output = String::new();
    heading(
        &mut output,
        &format!(
            "pacebench concurrency: {} ({} tasks, {} workers)",
            doc.runtime, doc.tasks, doc.workers
        ),
    );

    output.push_str(&format!(
        "  {:<10}  {:<15}  {:>10}  {:>10}  {:>8}  {}\n",
        "Kind", "Strategy", "wall s", "tasks/s", "speedup", "status"
    ));
    output.push_str(&format!("  {}\n", "-".repeat(RULE_WIDTH - 2)));
    for result in &doc.results {
        let status = match &result.status {
            StrategyStatus::Completed => "ok".to_string(),
            StrategyStatus::Partial => format!("{} task(s) failed", result.errors.len()),
            StrategyStatus::Unsupported { reason } => format!("unsupported: {reason}"),
            StrategyStatus::Failed { reason } => format!("failed: {reason}"),
        };
        output.push_str(&format!(
            "  {:<10}  {:<15}  {:>10.4}  {:>10}  {:>8}  {}\n",
            result.workload_kind.as_str(),
            result.strategy.as_str(),
            result.wall_seconds,
            opt(result.tasks_per_second, 2),
            opt(result.speedup_vs_sequential, 2),
            status
        ));
    }
    output
}

/// Cross-run micro summary, one block per runtime
pub fn format_micro_summary(entries: &[SummaryEntry]) -> String {
    let mut output = String::new();
    heading(&mut output, "pacebench micro summary");

    for entry in entries {
        output.push_str(&format!(
            "{} - {} document(s)\n",
            entry.runtime, entry.document_count
        ));
        let width = entry
            .cases
            .iter()
            .map(|c| c.case_name.len())
            .max()
            .unwrap_or(20);
        for case in &entry.cases {
            output.push_str(&format!(
                "  {:<width$}  mean {:>12.6} s  stddev {:>10.6}  rel {:>6}",
                case.case_name,
                case.mean,
                case.stddev,
                opt(case.relative_to_baseline, 2)
            ));
            if case.missing_in > 0 {
                output.push_str(&format!("  (missing in {})", case.missing_in));
            }
            output.push('\n');
        }
        output.push('\n');
    }
    output
}

/// Cross-run concurrency summary, one block per runtime
pub fn format_concurrency_summary(entries: &[ConcurrencySummaryEntry]) -> String {
    let mut output = String::new();
    heading(&mut output, "pacebench concurrency summary");

    for entry in entries {
        output.push_str(&format!(
            "{} - {} document(s)\n",
            entry.runtime, entry.document_count
        ));
        for s in &entry.strategies {
            if s.runs == 0 {
                output.push_str(&format!(
                    "  {:<10}  {:<15}  unsupported\n",
                    s.workload_kind.as_str(),
                    s.strategy.as_str()
                ));
                continue;
            }
            output.push_str(&format!(
                "  {:<10}  {:<15}  wall {:>9} s  median {:>9} s  speedup {:>6}\n",
                s.workload_kind.as_str(),
                s.strategy.as_str(),
                opt(s.mean_wall_seconds, 4),
                opt(s.median_wall_seconds, 4),
                opt(s.mean_speedup, 2)
            ));
        }
        output.push('\n');
    }
    output
}
