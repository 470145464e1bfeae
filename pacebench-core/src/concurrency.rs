//! Concurrency Result Types
//!
//! Shared vocabulary of the strategy comparator (which produces these) and
//! the cross-run aggregator (which reads them back from documents).

use crate::EngineError;
use crate::catalog::{Catalog, WorkloadCase};
use pacebench_stats::speedup;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character of the task fanned out by the comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Burns CPU; only true parallelism speeds it up
    CpuBound,
    /// Blocks without using the CPU; any overlap speeds it up
    IoBound,
}

impl WorkloadKind {
    /// Every kind, in comparison order
    pub const ALL: [WorkloadKind; 2] = [WorkloadKind::CpuBound, WorkloadKind::IoBound];

    /// Catalog entry backing this kind
    pub fn case_name(self) -> &'static str {
        match self {
            WorkloadKind::CpuBound => "count_primes",
            WorkloadKind::IoBound => "io_wait",
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::CpuBound => "cpu_bound",
            WorkloadKind::IoBound => "io_bound",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution strategy compared by the comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// All tasks on the calling thread
    Sequential,
    /// Shared-memory worker threads
    Threaded,
    /// Isolated-memory worker processes
    Multiprocess,
    /// Isolated but lightweight workers in one process
    Subinterpreter,
}

impl StrategyKind {
    /// Every strategy, in comparison order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Sequential,
        StrategyKind::Threaded,
        StrategyKind::Multiprocess,
        StrategyKind::Subinterpreter,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Sequential => "sequential",
            StrategyKind::Threaded => "threaded",
            StrategyKind::Multiprocess => "multiprocess",
            StrategyKind::Subinterpreter => "subinterpreter",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown strategy `{s}` (expected one of: sequential, threaded, multiprocess, subinterpreter)"
                )
            })
    }
}

/// Category of a per-task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The workload panicked
    Panicked,
    /// The workload returned an error
    WorkloadError,
    /// The worker did not answer within the configured timeout
    TimedOut,
    /// The worker process died while running the task
    WorkerCrashed,
    /// The strategy cannot run on this platform or for this workload
    StrategyUnsupported,
}

/// One failed task, recorded by index instead of aborting the strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Index of the task in `0..task_count`
    pub task_index: usize,
    /// Failure category
    pub kind: TaskErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl TaskError {
    /// Create a task error
    pub fn new(task_index: usize, kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_index,
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one strategy run as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StrategyStatus {
    /// Every task succeeded
    Completed,
    /// Some tasks failed; their errors are listed
    Partial,
    /// The strategy did not run
    Unsupported {
        /// Why it could not run
        reason: String,
    },
    /// Every task failed
    Failed {
        /// Summary of the failures
        reason: String,
    },
}

/// Which strategies a workload may be run under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySupport {
    /// Shared-memory threads
    pub threads: bool,
    /// Separate worker processes
    pub processes: bool,
    /// Lightweight isolates
    pub isolates: bool,
}

impl StrategySupport {
    /// Every strategy allowed
    pub const ALL: StrategySupport = StrategySupport {
        threads: true,
        processes: true,
        isolates: true,
    };

    /// Whether `strategy` may run this workload. Sequential always may.
    pub fn allows(&self, strategy: StrategyKind) -> bool {
        match strategy {
            StrategyKind::Sequential => true,
            StrategyKind::Threaded => self.threads,
            StrategyKind::Multiprocess => self.processes,
            StrategyKind::Subinterpreter => self.isolates,
        }
    }
}

impl Default for StrategySupport {
    fn default() -> Self {
        Self::ALL
    }
}

/// The task every strategy runs `task_count` times
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyWorkload {
    /// CPU- or IO-bound
    pub kind: WorkloadKind,
    /// Catalog entry invoked per task
    pub case: WorkloadCase,
    /// Parameter passed to every task
    pub param: u64,
    /// Strategies allowed to run it
    pub support: StrategySupport,
}

impl ConcurrencyWorkload {
    /// Standard workload for `kind`, resolved from `catalog` at its default param
    pub fn standard(kind: WorkloadKind, catalog: &Catalog) -> Result<Self, EngineError> {
        let case = catalog
            .get(kind.case_name())
            .copied()
            .ok_or_else(|| EngineError::UnknownWorkload(kind.case_name().to_string()))?;
        Ok(Self {
            kind,
            case,
            param: case.default_param,
            support: StrategySupport::ALL,
        })
    }

    /// Explicit workload, e.g. a custom catalog entry in tests
    pub fn new(kind: WorkloadKind, case: WorkloadCase, param: u64) -> Self {
        Self {
            kind,
            case,
            param,
            support: StrategySupport::ALL,
        }
    }

    /// Override the task parameter
    pub fn with_param(mut self, param: u64) -> Self {
        self.param = param;
        self
    }

    /// Restrict the strategies allowed to run this workload
    pub fn with_support(mut self, support: StrategySupport) -> Self {
        self.support = support;
        self
    }
}

/// Success (seconds spent in the task) or failure of one task
pub type TaskOutcome = Result<f64, TaskError>;

/// Result of running one strategy over `task_count` tasks.
///
/// Invariant: `per_task_seconds.len() + errors.len() == task_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyTaskResult {
    /// Strategy that ran
    pub strategy: StrategyKind,
    /// Task character
    pub workload_kind: WorkloadKind,
    /// Catalog name of the task
    pub workload: String,
    /// Task parameter
    pub param: u64,
    /// Tasks attempted
    pub task_count: usize,
    /// Workers requested
    pub worker_count: usize,
    /// Wall time of the whole strategy, including worker startup
    pub wall_seconds: f64,
    /// Per successful task, in task index order
    pub per_task_seconds: Vec<f64>,
    /// Per failed task, in task index order
    pub errors: Vec<TaskError>,
    /// Overall outcome
    pub status: StrategyStatus,
    /// Successful tasks per wall second
    pub tasks_per_second: Option<f64>,
    /// Sequential wall time divided by this wall time
    pub speedup_vs_sequential: Option<f64>,
}

impl ConcurrencyTaskResult {
    /// Result of a strategy that could not run: every task is marked
    /// `strategy_unsupported` and wall time is zero
    pub fn unsupported(
        strategy: StrategyKind,
        workload: &ConcurrencyWorkload,
        task_count: usize,
        worker_count: usize,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        let errors = (0..task_count)
            .map(|idx| TaskError::new(idx, TaskErrorKind::StrategyUnsupported, reason.clone()))
            .collect();

        Self {
            strategy,
            workload_kind: workload.kind,
            workload: workload.case.name.to_string(),
            param: workload.param,
            task_count,
            worker_count,
            wall_seconds: 0.0,
            per_task_seconds: Vec::new(),
            errors,
            status: StrategyStatus::Unsupported { reason },
            tasks_per_second: None,
            speedup_vs_sequential: None,
        }
    }

    /// Assemble a result from one outcome per task, indexed by task
    pub fn from_outcomes(
        strategy: StrategyKind,
        workload: &ConcurrencyWorkload,
        worker_count: usize,
        wall_seconds: f64,
        outcomes: Vec<TaskOutcome>,
    ) -> Self {
        let task_count = outcomes.len();
        let mut per_task_seconds = Vec::with_capacity(task_count);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(seconds) => per_task_seconds.push(seconds),
                Err(err) => errors.push(err),
            }
        }

        let status = if errors.is_empty() {
            StrategyStatus::Completed
        } else if per_task_seconds.is_empty() {
            StrategyStatus::Failed {
                reason: format!(
                    "all {task_count} tasks failed; first error: {}",
                    errors[0].message
                ),
            }
        } else {
            StrategyStatus::Partial
        };

        let tasks_per_second = if per_task_seconds.is_empty() || wall_seconds <= 0.0 {
            None
        } else {
            Some(per_task_seconds.len() as f64 / wall_seconds)
        };

        Self {
            strategy,
            workload_kind: workload.kind,
            workload: workload.case.name.to_string(),
            param: workload.param,
            task_count,
            worker_count,
            wall_seconds,
            per_task_seconds,
            errors,
            status,
            tasks_per_second,
            speedup_vs_sequential: None,
        }
    }

    /// Fill `speedup_vs_sequential` from the sequential run's wall time.
    ///
    /// Left empty when this run produced no successful task.
    pub fn set_speedup(&mut self, sequential_wall_seconds: f64) {
        self.speedup_vs_sequential = if self.per_task_seconds.is_empty() {
            None
        } else {
            speedup(sequential_wall_seconds, self.wall_seconds)
        };
    }

    /// Whether the strategy actually ran
    pub fn is_supported(&self) -> bool {
        !matches!(self.status, StrategyStatus::Unsupported { .. })
    }

    /// Field-wise equality with floats compared to within `tolerance`
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0);
        let close_opt = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => close(a, b),
            (None, None) => true,
            _ => false,
        };

        self.strategy == other.strategy
            && self.workload_kind == other.workload_kind
            && self.workload == other.workload
            && self.param == other.param
            && self.task_count == other.task_count
            && self.worker_count == other.worker_count
            && close(self.wall_seconds, other.wall_seconds)
            && self.per_task_seconds.len() == other.per_task_seconds.len()
            && self
                .per_task_seconds
                .iter()
                .zip(&other.per_task_seconds)
                .all(|(a, b)| close(*a, *b))
            && self.errors == other.errors
            && self.status == other.status
            && close_opt(self.tasks_per_second, other.tasks_per_second)
            && close_opt(self.speedup_vs_sequential, other.speedup_vs_sequential)
    }

    /// Structural invariants a persisted result must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        let accounted = self.per_task_seconds.len() + self.errors.len();
        if accounted != self.task_count {
            return Err(format!(
                "{} / {}: {} timings + {} errors != {} tasks",
                self.strategy,
                self.workload_kind,
                self.per_task_seconds.len(),
                self.errors.len(),
                self.task_count
            ));
        }
        if let Some(err) = self.errors.iter().find(|e| e.task_index >= self.task_count) {
            return Err(format!(
                "{} / {}: error for task {} out of range",
                self.strategy, self.workload_kind, err.task_index
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ResultShape, Suite, WorkloadError};

    fn zero(_: u64) -> Result<i64, WorkloadError> {
        Ok(0)
    }

    fn workload() -> ConcurrencyWorkload {
        let case = WorkloadCase::new("zero", "", zero, 3, ResultShape::Value, Suite::Concurrency);
        ConcurrencyWorkload::new(WorkloadKind::CpuBound, case, 3)
    }

    fn failure(idx: usize) -> TaskOutcome {
        Err(TaskError::new(idx, TaskErrorKind::WorkloadError, "nope"))
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(StrategyKind::Subinterpreter).unwrap(), "subinterpreter");
        assert_eq!(serde_json::to_value(WorkloadKind::IoBound).unwrap(), "io_bound");
        assert_eq!(
            serde_json::to_value(TaskErrorKind::StrategyUnsupported).unwrap(),
            "strategy_unsupported"
        );

        let status = serde_json::to_value(StrategyStatus::Failed {
            reason: "x".to_string(),
        })
        .unwrap();
        assert_eq!(status["state"], "failed");
        assert_eq!(status["reason"], "x");
        assert_eq!(
            serde_json::to_value(StrategyStatus::Completed).unwrap()["state"],
            "completed"
        );
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Threaded".parse::<StrategyKind>(), Ok(StrategyKind::Threaded));
        assert_eq!(" multiprocess ".parse::<StrategyKind>(), Ok(StrategyKind::Multiprocess));
        assert!("green-threads".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_completed_outcomes() {
        let result = ConcurrencyTaskResult::from_outcomes(
            StrategyKind::Threaded,
            &workload(),
            2,
            0.5,
            vec![Ok(0.1), Ok(0.2), Ok(0.3)],
        );
        assert_eq!(result.status, StrategyStatus::Completed);
        assert_eq!(result.task_count, 3);
        assert_eq!(result.per_task_seconds, vec![0.1, 0.2, 0.3]);
        assert_eq!(result.tasks_per_second, Some(6.0));
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_partial_outcomes_keep_invariant() {
        let result = ConcurrencyTaskResult::from_outcomes(
            StrategyKind::Sequential,
            &workload(),
            1,
            1.0,
            vec![Ok(0.1), failure(1), Ok(0.3)],
        );
        assert_eq!(result.status, StrategyStatus::Partial);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].task_index, 1);
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_all_failed_is_strategy_failure() {
        let mut result = ConcurrencyTaskResult::from_outcomes(
            StrategyKind::Threaded,
            &workload(),
            2,
            1.0,
            vec![failure(0), failure(1)],
        );
        assert!(matches!(result.status, StrategyStatus::Failed { .. }));
        assert_eq!(result.tasks_per_second, None);
        result.set_speedup(2.0);
        assert_eq!(result.speedup_vs_sequential, None);
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_unsupported_marks_every_task() {
        let result =
            ConcurrencyTaskResult::unsupported(StrategyKind::Multiprocess, &workload(), 4, 2, "no fork");
        assert_eq!(result.wall_seconds, 0.0);
        assert!(result.per_task_seconds.is_empty());
        assert_eq!(result.errors.len(), 4);
        assert!(
            result
                .errors
                .iter()
                .all(|e| e.kind == TaskErrorKind::StrategyUnsupported)
        );
        assert!(!result.is_supported());
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_speedup_vs_sequential() {
        let mut result = ConcurrencyTaskResult::from_outcomes(
            StrategyKind::Threaded,
            &workload(),
            4,
            0.25,
            vec![Ok(0.25)],
        );
        result.set_speedup(1.0);
        assert_eq!(result.speedup_vs_sequential, Some(4.0));
    }

    #[test]
    fn test_broken_invariant_detected() {
        let mut result =
            ConcurrencyTaskResult::from_outcomes(StrategyKind::Sequential, &workload(), 1, 1.0, vec![Ok(0.1)]);
        result.task_count = 2;
        assert!(result.check_invariants().is_err());
    }

    #[test]
    fn test_standard_workloads_resolve() {
        let catalog = Catalog::discover();
        let cpu = ConcurrencyWorkload::standard(WorkloadKind::CpuBound, &catalog).unwrap();
        assert_eq!(cpu.case.name, "count_primes");
        assert_eq!(cpu.param, 200_000);
        let io = ConcurrencyWorkload::standard(WorkloadKind::IoBound, &catalog).unwrap();
        assert_eq!(io.param, 20);

        let empty = Catalog::default();
        assert_eq!(
            ConcurrencyWorkload::standard(WorkloadKind::IoBound, &empty).unwrap_err(),
            EngineError::UnknownWorkload("io_wait".to_string())
        );
    }

    #[test]
    fn test_support_matrix() {
        let support = StrategySupport {
            threads: true,
            processes: false,
            isolates: true,
        };
        assert!(support.allows(StrategyKind::Sequential));
        assert!(!support.allows(StrategyKind::Multiprocess));
        assert!(StrategySupport::default().allows(StrategyKind::Multiprocess));
    }
}
