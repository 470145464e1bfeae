//! Cross-Run Aggregation
//!
//! Folds independently produced documents into one summary per runtime
//! identity. Documents are only borrowed; summaries own copies of what they
//! report.

use crate::ReportError;
use crate::document::{BenchmarkDocument, ConcurrencyDocument};
use chrono::{DateTime, Utc};
use pacebench_core::{RuntimeIdentity, StrategyKind, WorkloadKind};
use pacebench_stats::{aggregate, median};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Cross-document statistics of one micro case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    /// Catalog name
    pub case_name: String,
    /// Mean of `mean_total` over the documents containing the case
    pub mean: f64,
    /// Sample stddev of `mean_total` over those documents
    pub stddev: f64,
    /// Documents containing the case
    pub present_in: usize,
    /// Documents of the group lacking the case
    pub missing_in: usize,
    /// `mean / baseline mean`, when a baseline was requested and has the case
    pub relative_to_baseline: Option<f64>,
}

/// Micro summary of one runtime identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    /// Runtime the documents came from
    #[serde(flatten)]
    pub runtime: RuntimeIdentity,
    /// Number of documents folded in
    pub document_count: usize,
    /// Per case, in first-appearance order
    pub cases: Vec<CaseSummary>,
}

impl SummaryEntry {
    /// Case by name
    pub fn case(&self, name: &str) -> Option<&CaseSummary> {
        self.cases.iter().find(|case| case.case_name == name)
    }
}

/// Cross-document statistics of one strategy on one workload kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    /// Task character
    pub workload_kind: WorkloadKind,
    /// Strategy
    pub strategy: StrategyKind,
    /// Documents in which the strategy ran
    pub runs: usize,
    /// Documents in which the strategy was unsupported
    pub unsupported_in: usize,
    /// Mean wall seconds over the runs
    pub mean_wall_seconds: Option<f64>,
    /// Sample stddev of wall seconds over the runs
    pub stddev_wall_seconds: Option<f64>,
    /// Median wall seconds over the runs
    pub median_wall_seconds: Option<f64>,
    /// Mean speedup against sequential over the runs that report one
    pub mean_speedup: Option<f64>,
    /// Failed tasks summed over the runs
    pub failed_tasks: usize,
}

/// Concurrency summary of one runtime identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySummaryEntry {
    /// Runtime the documents came from
    #[serde(flatten)]
    pub runtime: RuntimeIdentity,
    /// Number of documents folded in
    pub document_count: usize,
    /// Per (workload kind, strategy), in comparison order
    pub strategies: Vec<StrategySummary>,
}

impl ConcurrencySummaryEntry {
    /// Strategy summary by kind
    pub fn strategy(&self, kind: WorkloadKind, strategy: StrategyKind) -> Option<&StrategySummary> {
        self.strategies
            .iter()
            .find(|s| s.workload_kind == kind && s.strategy == strategy)
    }
}

/// Suite a summary covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySuite {
    /// Micro benchmarks
    Micro,
    /// Concurrency comparison
    Concurrency,
}

/// Entries of a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryEntries {
    /// Micro entries
    Micro(Vec<SummaryEntry>),
    /// Concurrency entries
    Concurrency(Vec<ConcurrencySummaryEntry>),
}

/// Persistable summary of one aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// When the pass ran
    pub generated_at: DateTime<Utc>,
    /// Which suite was summarized
    pub suite: SummarySuite,
    /// Per-identity entries, ordered by implementation, version, lock mode
    pub entries: SummaryEntries,
}

impl Summary {
    /// Micro summary stamped now
    pub fn micro(entries: Vec<SummaryEntry>) -> Self {
        Self {
            generated_at: Utc::now(),
            suite: SummarySuite::Micro,
            entries: SummaryEntries::Micro(entries),
        }
    }

    /// Concurrency summary stamped now
    pub fn concurrency(entries: Vec<ConcurrencySummaryEntry>) -> Self {
        Self {
            generated_at: Utc::now(),
            suite: SummarySuite::Concurrency,
            entries: SummaryEntries::Concurrency(entries),
        }
    }

    /// Pretty JSON
    pub fn to_json(&self) -> Result<String, ReportError> {
        serde_json::to_string_pretty(self).map_err(|e| ReportError::Serialize(e.to_string()))
    }
}

/// Sort key of a version string: leading dotted numeric components, then a
/// free-threaded `t` suffix, then the raw string.
fn version_key(version: &str) -> (Vec<u64>, u8, &str) {
    let mut parts = Vec::new();
    for part in version.split('.') {
        let digits: &str = &part[..part.find(|c: char| !c.is_ascii_digit()).unwrap_or(part.len())];
        match digits.parse() {
            Ok(n) => parts.push(n),
            Err(_) => break,
        }
        if digits.len() != part.len() {
            break;
        }
    }
    let variant = u8::from(version.to_ascii_lowercase().ends_with('t'));
    (parts, variant, version)
}

/// Order identities by implementation, numeric version, then lock mode
/// (parallel after serialized/unknown)
pub fn compare_identities(a: &RuntimeIdentity, b: &RuntimeIdentity) -> Ordering {
    let gil_rank = |id: &RuntimeIdentity| u8::from(id.gil_disabled == Some(true));
    a.implementation
        .cmp(&b.implementation)
        .then_with(|| version_key(&a.version).cmp(&version_key(&b.version)))
        .then_with(|| gil_rank(a).cmp(&gil_rank(b)))
        .then_with(|| a.gil_disabled.cmp(&b.gil_disabled))
}

/// Group items by identity, keeping input order inside a group
fn group_by_identity<'a, T>(
    items: &'a [T],
    identity: impl Fn(&T) -> &RuntimeIdentity,
) -> Vec<(&'a RuntimeIdentity, Vec<&'a T>)>
where
    T: 'a,
{
    let mut groups: Vec<(&RuntimeIdentity, Vec<&T>)> = Vec::new();
    for item in items {
        let id = identity(item);
        match groups.iter_mut().find(|(key, _)| *key == id) {
            Some((_, members)) => members.push(item),
            None => groups.push((id, vec![item])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| compare_identities(a, b));
    groups
}

/// Summarize micro documents, one entry per runtime identity.
///
/// Cases absent from some documents of a group are reported with
/// `missing_in > 0` rather than failing.
pub fn aggregate_documents(docs: &[BenchmarkDocument]) -> Result<Vec<SummaryEntry>, ReportError> {
    if docs.is_empty() {
        return Err(ReportError::NoInputData);
    }

    let mut entries = Vec::new();
    for (runtime, members) in group_by_identity(docs, |doc| &doc.runtime) {
        let mut case_order: Vec<&str> = Vec::new();
        for doc in &members {
            for name in doc.cases.keys() {
                if !case_order.contains(&name.as_str()) {
                    case_order.push(name);
                }
            }
        }

        let mut cases = Vec::with_capacity(case_order.len());
        for name in case_order {
            let samples: Vec<f64> = members
                .iter()
                .filter_map(|doc| doc.cases.get(name))
                .map(|result| result.mean_total)
                .collect();
            let (mean, stddev) = aggregate(&samples)?;
            cases.push(CaseSummary {
                case_name: name.to_string(),
                mean,
                stddev,
                present_in: samples.len(),
                missing_in: members.len() - samples.len(),
                relative_to_baseline: None,
            });
        }

        tracing::debug!(runtime = %runtime, documents = members.len(), cases = cases.len(), "aggregated group");
        entries.push(SummaryEntry {
            runtime: runtime.clone(),
            document_count: members.len(),
            cases,
        });
    }
    Ok(entries)
}

/// [`aggregate_documents`] plus `relative_to_baseline` against `baseline`.
///
/// A baseline identity absent from the input leaves every ratio empty.
pub fn aggregate_documents_against(
    docs: &[BenchmarkDocument],
    baseline: &RuntimeIdentity,
) -> Result<Vec<SummaryEntry>, ReportError> {
    let mut entries = aggregate_documents(docs)?;

    let Some(reference) = entries.iter().find(|e| e.runtime == *baseline).cloned() else {
        tracing::warn!(baseline = %baseline, "baseline runtime not among the documents");
        return Ok(entries);
    };

    for entry in &mut entries {
        for case in &mut entry.cases {
            case.relative_to_baseline = reference
                .case(&case.case_name)
                .filter(|base| base.mean > 0.0)
                .map(|base| case.mean / base.mean);
        }
    }
    Ok(entries)
}

/// Summarize concurrency documents, one entry per runtime identity
pub fn aggregate_concurrency_documents(
    docs: &[ConcurrencyDocument],
) -> Result<Vec<ConcurrencySummaryEntry>, ReportError> {
    if docs.is_empty() {
        return Err(ReportError::NoInputData);
    }

    let mut entries = Vec::new();
    for (runtime, members) in group_by_identity(docs, |doc| &doc.runtime) {
        let mut strategies = Vec::new();
        for kind in WorkloadKind::ALL {
            for strategy in StrategyKind::ALL {
                let results: Vec<_> = members
                    .iter()
                    .flat_map(|doc| &doc.results)
                    .filter(|r| r.workload_kind == kind && r.strategy == strategy)
                    .collect();
                if results.is_empty() {
                    continue;
                }

                let ran: Vec<_> = results.iter().filter(|r| r.is_supported()).collect();
                let walls: Vec<f64> = ran.iter().map(|r| r.wall_seconds).collect();
                let speedups: Vec<f64> = ran.iter().filter_map(|r| r.speedup_vs_sequential).collect();
                let wall_stats = aggregate(&walls).ok();

                strategies.push(StrategySummary {
                    workload_kind: kind,
                    strategy,
                    runs: ran.len(),
                    unsupported_in: results.len() - ran.len(),
                    mean_wall_seconds: wall_stats.map(|(mean, _)| mean),
                    stddev_wall_seconds: wall_stats.map(|(_, stddev)| stddev),
                    median_wall_seconds: median(&walls).ok(),
                    mean_speedup: aggregate(&speedups).ok().map(|(mean, _)| mean),
                    failed_tasks: ran.iter().map(|r| r.errors.len()).sum(),
                });
            }
        }

        entries.push(ConcurrencySummaryEntry {
            runtime: runtime.clone(),
            document_count: members.len(),
            strategies,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacebench_core::{
        ConcurrencyTaskResult, FixedProbe, LockMode, RunResult, RuntimeContext, StrategyStatus,
    };

    fn ctx(implementation: &str, version: &str, mode: LockMode) -> RuntimeContext {
        RuntimeContext::resolve(implementation, version, &FixedProbe(mode))
    }

    fn micro(ctx: &RuntimeContext, cases: &[(&str, f64)]) -> BenchmarkDocument {
        let results = cases
            .iter()
            .map(|(name, total)| RunResult::from_runs(*name, 1, vec![*total]).unwrap())
            .collect();
        BenchmarkDocument::new(ctx, 1, 1, results)
    }

    fn task_result(strategy: StrategyKind, wall: f64, supported: bool) -> ConcurrencyTaskResult {
        ConcurrencyTaskResult {
            strategy,
            workload_kind: WorkloadKind::CpuBound,
            workload: "count_primes".to_string(),
            param: 10,
            task_count: 1,
            worker_count: 1,
            wall_seconds: if supported { wall } else { 0.0 },
            per_task_seconds: if supported { vec![wall] } else { Vec::new() },
            errors: if supported {
                Vec::new()
            } else {
                vec![pacebench_core::TaskError::new(
                    0,
                    pacebench_core::TaskErrorKind::StrategyUnsupported,
                    "n/a",
                )]
            },
            status: if supported {
                StrategyStatus::Completed
            } else {
                StrategyStatus::Unsupported {
                    reason: "n/a".to_string(),
                }
            },
            tasks_per_second: supported.then(|| 1.0 / wall),
            speedup_vs_sequential: supported.then(|| 1.0 / wall),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(aggregate_documents(&[]), Err(ReportError::NoInputData)));
        assert!(matches!(
            aggregate_concurrency_documents(&[]),
            Err(ReportError::NoInputData)
        ));
    }

    #[test]
    fn test_groups_by_identity() {
        let a = ctx("CPython", "3.14", LockMode::Serialized);
        let b = ctx("CPython", "3.14", LockMode::Parallel);
        let docs = vec![
            micro(&a, &[("x", 1.0)]),
            micro(&b, &[("x", 5.0)]),
            micro(&a, &[("x", 3.0)]),
        ];
        let entries = aggregate_documents(&docs).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].runtime.gil_disabled, Some(false));
        assert_eq!(entries[0].document_count, 2);
        let x = entries[0].case("x").unwrap();
        assert!((x.mean - 2.0).abs() < 1e-12);
        assert!((x.stddev - 2f64.sqrt()).abs() < 1e-12);

        assert_eq!(entries[1].runtime.gil_disabled, Some(true));
        assert_eq!(entries[1].case("x").unwrap().stddev, 0.0);
    }

    #[test]
    fn test_missing_cases_flagged() {
        let a = ctx("PyPy", "7.3", LockMode::Undetermined);
        let docs = vec![micro(&a, &[("x", 1.0), ("y", 2.0)]), micro(&a, &[("x", 1.0)])];
        let entries = aggregate_documents(&docs).unwrap();
        let y = entries[0].case("y").unwrap();
        assert_eq!(y.present_in, 1);
        assert_eq!(y.missing_in, 1);
        assert_eq!(y.mean, 2.0);
        assert_eq!(entries[0].case("x").unwrap().missing_in, 0);
    }

    #[test]
    fn test_case_order_follows_first_appearance() {
        let a = ctx("CPython", "3.13", LockMode::Serialized);
        let docs = vec![micro(&a, &[("m", 1.0)]), micro(&a, &[("b", 1.0), ("z", 1.0)])];
        let entries = aggregate_documents(&docs).unwrap();
        let names: Vec<&str> = entries[0].cases.iter().map(|c| c.case_name.as_str()).collect();
        assert_eq!(names, ["m", "b", "z"]);
    }

    #[test]
    fn test_identity_ordering() {
        let docs = vec![
            micro(&ctx("CPython", "3.14", LockMode::Parallel), &[("x", 1.0)]),
            micro(&ctx("PyPy", "7.3", LockMode::Undetermined), &[("x", 1.0)]),
            micro(&ctx("CPython", "3.9", LockMode::Serialized), &[("x", 1.0)]),
            micro(&ctx("CPython", "3.14", LockMode::Serialized), &[("x", 1.0)]),
            micro(&ctx("CPython", "3.13t", LockMode::Parallel), &[("x", 1.0)]),
        ];
        let entries = aggregate_documents(&docs).unwrap();
        let order: Vec<String> = entries.iter().map(|e| e.runtime.slug()).collect();
        assert_eq!(
            order,
            [
                "cpython-3.9",
                "cpython-3.13t-nogil",
                "cpython-3.14",
                "cpython-3.14-nogil",
                "pypy-7.3",
            ]
        );
    }

    #[test]
    fn test_version_key() {
        assert!(version_key("3.9") < version_key("3.10"));
        assert!(version_key("3.13") < version_key("3.13t"));
        assert_eq!(version_key("0.1.0+release").0, vec![0, 1, 0]);
    }

    #[test]
    fn test_relative_to_baseline() {
        let base = ctx("CPython", "3.14", LockMode::Serialized);
        let other = ctx("PyPy", "7.3", LockMode::Undetermined);
        let docs = vec![
            micro(&base, &[("x", 2.0), ("y", 1.0)]),
            micro(&other, &[("x", 1.0), ("z", 1.0)]),
        ];
        let entries = aggregate_documents_against(&docs, base.identity()).unwrap();
        assert_eq!(entries[0].case("x").unwrap().relative_to_baseline, Some(1.0));
        assert_eq!(entries[1].case("x").unwrap().relative_to_baseline, Some(0.5));
        assert_eq!(entries[1].case("z").unwrap().relative_to_baseline, None);

        let absent = RuntimeIdentity::new("Jython", "2.7", None);
        let entries = aggregate_documents_against(&docs, &absent).unwrap();
        assert!(entries.iter().flat_map(|e| &e.cases).all(|c| c.relative_to_baseline.is_none()));
    }

    #[test]
    fn test_concurrency_summary() {
        let a = ctx("CPython", "3.14", LockMode::Serialized);
        let docs = vec![
            ConcurrencyDocument::new(
                &a,
                1,
                1,
                vec![
                    task_result(StrategyKind::Sequential, 1.0, true),
                    task_result(StrategyKind::Subinterpreter, 0.0, false),
                ],
            ),
            ConcurrencyDocument::new(
                &a,
                1,
                1,
                vec![
                    task_result(StrategyKind::Sequential, 3.0, true),
                    task_result(StrategyKind::Subinterpreter, 0.5, true),
                ],
            ),
        ];
        let entries = aggregate_concurrency_documents(&docs).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].document_count, 2);
        assert_eq!(entries[0].strategies.len(), 2);

        let seq = entries[0]
            .strategy(WorkloadKind::CpuBound, StrategyKind::Sequential)
            .unwrap();
        assert_eq!(seq.runs, 2);
        assert_eq!(seq.mean_wall_seconds, Some(2.0));
        assert_eq!(seq.median_wall_seconds, Some(2.0));

        let sub = entries[0]
            .strategy(WorkloadKind::CpuBound, StrategyKind::Subinterpreter)
            .unwrap();
        assert_eq!(sub.runs, 1);
        assert_eq!(sub.unsupported_in, 1);
        assert_eq!(sub.mean_wall_seconds, Some(0.5));
        assert_eq!(sub.stddev_wall_seconds, Some(0.0));
        assert_eq!(sub.mean_speedup, Some(2.0));
    }

    #[test]
    fn test_summary_json_shape() {
        let a = ctx("CPython", "3.14", LockMode::Serialized);
        let entries = aggregate_documents(&[micro(&a, &[("x", 1.0)])]).unwrap();
        let json = Summary::micro(entries).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["suite"], "micro");
        assert!(value["generated_at"].is_string());
        assert_eq!(value["entries"][0]["python_implementation"], "CPython");
        assert_eq!(value["entries"][0]["cases"][0]["present_in"], 1);
    }
}
