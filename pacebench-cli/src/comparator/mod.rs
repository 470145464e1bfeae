//! Concurrency Strategy Comparator
//!
//! Runs the same batch of tasks under each execution strategy in turn and
//! records how long every strategy took. Strategies never overlap and every
//! task is attempted exactly once per strategy. Per-task failures are
//! recorded by index; they never abort a strategy or the comparison.
//!
//! ## Module Organization
//!
//! - `sequential`: all tasks on the calling thread
//! - `threaded`: shared-memory worker threads on a rayon pool
//! - `multiprocess`: isolated worker processes driven over IPC (unix)
//! - `isolates`: per-thread private tokio runtimes (`isolates` feature)

mod isolates;
mod multiprocess;
mod sequential;
mod threaded;

pub use isolates::IsolateStrategy;
pub use multiprocess::MultiprocessStrategy;
pub use sequential::SequentialStrategy;
pub use threaded::ThreadedStrategy;

use pacebench_core::{
    Catalog, ConcurrencyTaskResult, ConcurrencyWorkload, EngineError, RuntimeContext,
    StrategyKind, TaskError, TaskErrorKind, TaskOutcome, WorkloadCase, WorkloadKind,
    panic_message,
};
use pacebench_report::ConcurrencyDocument;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Whether a strategy can run here
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// The strategy can run
    Available,
    /// The strategy cannot run, with the reason recorded in results
    Unsupported(String),
}

/// What a strategy is asked to do
#[derive(Debug, Clone, Copy)]
pub struct TaskPlan {
    /// Task run `task_count` times
    pub workload: ConcurrencyWorkload,
    /// Number of tasks
    pub task_count: usize,
    /// Number of workers
    pub worker_count: usize,
}

/// What a strategy produced
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyRun {
    /// The strategy ran; one outcome per task, indexed by task
    Ran {
        /// Wall time of the whole run, including worker startup
        wall_seconds: f64,
        /// Per-task outcomes
        outcomes: Vec<TaskOutcome>,
    },
    /// The strategy found out at run time that it cannot run
    Unsupported(String),
}

/// One execution strategy
pub trait Strategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Whether it can run on this platform and build
    fn availability(&self) -> Availability {
        Availability::Available
    }

    /// Run every task of `plan` exactly once
    fn run(&self, plan: &TaskPlan) -> StrategyRun;
}

/// Stand-in for a strategy switched off by configuration
#[derive(Debug, Clone, Copy)]
pub struct Disabled(pub StrategyKind);

impl Strategy for Disabled {
    fn kind(&self) -> StrategyKind {
        self.0
    }

    fn availability(&self) -> Availability {
        Availability::Unsupported("disabled by configuration".to_string())
    }

    fn run(&self, _plan: &TaskPlan) -> StrategyRun {
        StrategyRun::Unsupported("disabled by configuration".to_string())
    }
}

/// Knobs of the standard strategy set
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions {
    /// Serialize threaded task bodies behind one mutex
    pub global_lock: bool,
    /// Worker binary for the multiprocess strategy (this executable if unset)
    pub worker_binary: Option<PathBuf>,
    /// Per-task timeout for worker processes
    pub worker_timeout: Option<Duration>,
    /// Strategies replaced by [`Disabled`]
    pub disabled: Vec<StrategyKind>,
}

/// Construction of the strategy list
pub struct Strategies;

impl Strategies {
    /// The four strategies in comparison order
    pub fn standard(options: &StrategyOptions) -> Vec<Box<dyn Strategy>> {
        StrategyKind::ALL
            .into_iter()
            .map(|kind| -> Box<dyn Strategy> {
                if options.disabled.contains(&kind) {
                    return Box::new(Disabled(kind));
                }
                match kind {
                    StrategyKind::Sequential => Box::new(SequentialStrategy),
                    StrategyKind::Threaded => Box::new(ThreadedStrategy::new(options.global_lock)),
                    StrategyKind::Multiprocess => Box::new(MultiprocessStrategy::new(
                        options.worker_binary.clone(),
                        options.worker_timeout,
                    )),
                    StrategyKind::Subinterpreter => Box::new(IsolateStrategy),
                }
            })
            .collect()
    }
}

/// Runs a workload under every configured strategy
pub struct Comparator {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Comparator {
    /// Comparator over an explicit strategy list
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Comparator over [`Strategies::standard`]
    pub fn standard(options: &StrategyOptions) -> Self {
        Self::new(Strategies::standard(options))
    }

    /// Strategies in run order
    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// One result per strategy, in list order. Speedups are relative to the
    /// sequential run when it produced timings.
    pub fn compare(
        &self,
        workload: &ConcurrencyWorkload,
        task_count: usize,
        worker_count: usize,
    ) -> Result<Vec<ConcurrencyTaskResult>, EngineError> {
        EngineError::ensure_positive("task_count", task_count as u64)?;
        EngineError::ensure_positive("worker_count", worker_count as u64)?;

        let plan = TaskPlan {
            workload: *workload,
            task_count,
            worker_count,
        };

        let mut results = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let kind = strategy.kind();
            let unsupported = |reason: String| {
                tracing::info!(strategy = %kind, workload = %workload.kind, %reason, "strategy unsupported");
                ConcurrencyTaskResult::unsupported(kind, workload, task_count, worker_count, reason)
            };

            if !workload.support.allows(kind) {
                results.push(unsupported(format!(
                    "workload `{}` does not support the {kind} strategy",
                    workload.case.name
                )));
                continue;
            }
            if let Availability::Unsupported(reason) = strategy.availability() {
                results.push(unsupported(reason));
                continue;
            }

            tracing::info!(strategy = %kind, workload = %workload.kind, task_count, worker_count, "running strategy");
            let result = match strategy.run(&plan) {
                StrategyRun::Ran {
                    wall_seconds,
                    outcomes,
                } => ConcurrencyTaskResult::from_outcomes(
                    kind,
                    workload,
                    worker_count,
                    wall_seconds,
                    outcomes,
                ),
                StrategyRun::Unsupported(reason) => unsupported(reason),
            };
            tracing::info!(
                strategy = %kind,
                wall_seconds = result.wall_seconds,
                failed = result.errors.len(),
                "strategy finished"
            );
            results.push(result);
        }

        let sequential_wall = results
            .iter()
            .find(|r| r.strategy == StrategyKind::Sequential && !r.per_task_seconds.is_empty())
            .map(|r| r.wall_seconds);
        if let Some(baseline) = sequential_wall {
            for result in &mut results {
                result.set_speedup(baseline);
            }
        }

        Ok(results)
    }
}

/// The CPU-bound and IO-bound catalog workloads, with optional parameter
/// overrides
pub fn standard_workloads(
    catalog: &Catalog,
    cpu_param: Option<u64>,
    io_param_ms: Option<u64>,
) -> Result<Vec<ConcurrencyWorkload>, EngineError> {
    WorkloadKind::ALL
        .into_iter()
        .map(|kind| {
            let workload = ConcurrencyWorkload::standard(kind, catalog)?;
            let param = match kind {
                WorkloadKind::CpuBound => cpu_param,
                WorkloadKind::IoBound => io_param_ms,
            };
            Ok(match param {
                Some(param) => workload.with_param(param),
                None => workload,
            })
        })
        .collect()
}

/// Compare every workload and collect the results into one document
pub fn run_concurrency(
    ctx: &RuntimeContext,
    comparator: &Comparator,
    workloads: &[ConcurrencyWorkload],
    task_count: usize,
    worker_count: usize,
) -> Result<ConcurrencyDocument, EngineError> {
    let mut results = Vec::new();
    for workload in workloads {
        tracing::info!(workload = %workload.kind, case = workload.case.name, param = workload.param, "comparing strategies");
        results.extend(comparator.compare(workload, task_count, worker_count)?);
    }
    Ok(ConcurrencyDocument::new(ctx, task_count, worker_count, results))
}

/// Shared cursor handing out task indices `0..len` exactly once each
#[derive(Debug)]
pub struct TaskQueue {
    next: AtomicUsize,
    len: usize,
}

impl TaskQueue {
    /// Queue of `len` tasks
    pub fn new(len: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            len,
        }
    }

    /// Claim the next task, if any remain
    pub fn next(&self) -> Option<usize> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        (idx < self.len).then_some(idx)
    }
}

/// Outcomes keyed by task index, written once each
#[derive(Debug)]
pub struct ResultSink {
    slots: Mutex<Vec<Option<TaskOutcome>>>,
}

impl ResultSink {
    /// Sink for `len` tasks
    pub fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; len]),
        }
    }

    /// Record the outcome of `task_index`. A second write to the same slot
    /// is ignored.
    pub fn record(&self, task_index: usize, outcome: TaskOutcome) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(task_index) {
            Some(slot @ None) => *slot = Some(outcome),
            Some(Some(_)) => {
                tracing::warn!(task_index, "task reported twice; keeping the first outcome")
            }
            None => tracing::warn!(task_index, "task index out of range"),
        }
    }

    /// All outcomes in task order. A task nobody reported becomes a
    /// `worker_crashed` error.
    pub fn into_outcomes(self) -> Vec<TaskOutcome> {
        self.slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    Err(TaskError::new(
                        idx,
                        TaskErrorKind::WorkerCrashed,
                        "no worker reported this task",
                    ))
                })
            })
            .collect()
    }
}

/// Run one task in this process, timing it and catching panics
pub(crate) fn execute_task(case: &WorkloadCase, param: u64, task_index: usize) -> TaskOutcome {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| case.call(param)));
    let elapsed = start.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(value)) => {
            std::hint::black_box(value);
            Ok(elapsed)
        }
        Ok(Err(err)) => Err(TaskError::new(
            task_index,
            TaskErrorKind::WorkloadError,
            err.to_string(),
        )),
        Err(panic) => Err(TaskError::new(
            task_index,
            TaskErrorKind::Panicked,
            panic_message(panic.as_ref()),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use pacebench_core::{
        ConcurrencyWorkload, ResultShape, Suite, WorkloadCase, WorkloadError, WorkloadKind,
    };
    use std::time::Duration;

    fn nap(millis: u64) -> Result<i64, WorkloadError> {
        std::thread::sleep(Duration::from_millis(millis));
        Ok(millis as i64)
    }

    fn odd_tasks_fail(_: u64) -> Result<i64, WorkloadError> {
        // The task index is not visible to workloads, so alternate per call
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        if CALLS.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            Err(WorkloadError::Failed("odd call".to_string()))
        } else {
            Ok(0)
        }
    }

    fn always_panics(_: u64) -> Result<i64, WorkloadError> {
        panic!("task exploded");
    }

    pub fn sleeping(millis: u64) -> ConcurrencyWorkload {
        let case = WorkloadCase::new("nap", "", nap, millis, ResultShape::Value, Suite::Concurrency);
        ConcurrencyWorkload::new(WorkloadKind::IoBound, case, millis)
    }

    pub fn flaky() -> ConcurrencyWorkload {
        let case = WorkloadCase::new(
            "odd_tasks_fail",
            "",
            odd_tasks_fail,
            0,
            ResultShape::Value,
            Suite::Diagnostic,
        );
        ConcurrencyWorkload::new(WorkloadKind::CpuBound, case, 0)
    }

    pub fn panicking() -> ConcurrencyWorkload {
        let case = WorkloadCase::new(
            "always_panics",
            "",
            always_panics,
            0,
            ResultShape::Value,
            Suite::Diagnostic,
        );
        ConcurrencyWorkload::new(WorkloadKind::CpuBound, case, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use pacebench_core::{StrategyStatus, StrategySupport};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn in_process_only() -> StrategyOptions {
        StrategyOptions {
            disabled: vec![StrategyKind::Multiprocess],
            ..StrategyOptions::default()
        }
    }

    #[test]
    fn test_task_queue_hands_out_each_index_once() {
        let queue = Arc::new(TaskQueue::new(1_000));
        let claimed: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    scope.spawn(move || std::iter::from_fn(|| queue.next()).collect::<Vec<_>>())
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        assert_eq!(claimed.len(), 1_000);
        assert_eq!(claimed.iter().copied().collect::<HashSet<_>>().len(), 1_000);
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_result_sink_first_write_wins() {
        let sink = ResultSink::new(3);
        sink.record(0, Ok(1.0));
        sink.record(0, Ok(2.0));
        sink.record(2, Ok(3.0));
        sink.record(7, Ok(4.0));
        let outcomes = sink.into_outcomes();
        assert_eq!(outcomes[0], Ok(1.0));
        assert_eq!(outcomes[1].as_ref().unwrap_err().kind, TaskErrorKind::WorkerCrashed);
        assert_eq!(outcomes[2], Ok(3.0));
    }

    #[test]
    fn test_standard_order_and_disabling() {
        let comparator = Comparator::standard(&StrategyOptions::default());
        assert_eq!(comparator.kinds(), StrategyKind::ALL.to_vec());

        let strategies = Strategies::standard(&in_process_only());
        assert_eq!(
            strategies[2].availability(),
            Availability::Unsupported("disabled by configuration".to_string())
        );
    }

    #[test]
    fn test_compare_rejects_zero_counts() {
        let comparator = Comparator::standard(&in_process_only());
        let workload = sleeping(1);
        assert!(matches!(
            comparator.compare(&workload, 0, 2),
            Err(EngineError::InvalidParameter { name: "task_count", .. })
        ));
        assert!(matches!(
            comparator.compare(&workload, 2, 0),
            Err(EngineError::InvalidParameter { name: "worker_count", .. })
        ));
    }

    #[test]
    fn test_compare_accounts_for_every_task() {
        let comparator = Comparator::standard(&in_process_only());
        let results = comparator.compare(&sleeping(5), 6, 3).unwrap();
        assert_eq!(results.len(), 4);
        for (result, kind) in results.iter().zip(StrategyKind::ALL) {
            assert_eq!(result.strategy, kind);
            assert_eq!(result.task_count, 6);
            assert!(result.check_invariants().is_ok(), "{kind}");
        }
        assert_eq!(results[0].status, StrategyStatus::Completed);
        assert_eq!(results[1].status, StrategyStatus::Completed);
        assert!(matches!(results[2].status, StrategyStatus::Unsupported { .. }));
        assert_eq!(results[2].wall_seconds, 0.0);
        assert_eq!(results[0].speedup_vs_sequential, Some(1.0));
    }

    #[test]
    fn test_sleeping_tasks_overlap_under_threads() {
        let comparator = Comparator::standard(&in_process_only());
        let results = comparator.compare(&sleeping(30), 4, 4).unwrap();
        let sequential = results[0].wall_seconds;
        let threaded = results[1].wall_seconds;
        // Four 30ms sleeps take >= 120ms in a row but overlap on four threads
        assert!(sequential >= 0.12);
        assert!(threaded < sequential, "threaded {threaded} vs sequential {sequential}");
    }

    #[test]
    fn test_unsupported_pairing_is_recorded() {
        let comparator = Comparator::standard(&in_process_only());
        let workload = sleeping(1).with_support(StrategySupport {
            threads: false,
            processes: true,
            isolates: true,
        });
        let results = comparator.compare(&workload, 3, 2).unwrap();
        assert!(matches!(results[1].status, StrategyStatus::Unsupported { .. }));
        assert!(
            results[1]
                .errors
                .iter()
                .all(|e| e.kind == TaskErrorKind::StrategyUnsupported)
        );
    }

    #[test]
    fn test_all_tasks_panicking_fails_the_strategy() {
        let comparator = Comparator::new(vec![Box::new(SequentialStrategy)]);
        let results = comparator.compare(&panicking(), 3, 1).unwrap();
        assert!(matches!(results[0].status, StrategyStatus::Failed { .. }));
        assert_eq!(results[0].errors.len(), 3);
        assert!(results[0].errors.iter().all(|e| e.kind == TaskErrorKind::Panicked));
        assert_eq!(results[0].speedup_vs_sequential, None);
    }

    #[test]
    fn test_partial_failures_keep_going() {
        let comparator = Comparator::new(vec![Box::new(SequentialStrategy)]);
        let results = comparator.compare(&flaky(), 4, 1).unwrap();
        assert_eq!(results[0].status, StrategyStatus::Partial);
        assert_eq!(results[0].errors.len(), 2);
        assert_eq!(results[0].per_task_seconds.len(), 2);
    }

    #[test]
    fn test_run_concurrency_covers_both_kinds() {
        use pacebench_core::{FixedProbe, LockMode};
        use pacebench_report::{Document, to_json};

        let catalog = Catalog::discover();
        let workloads = standard_workloads(&catalog, Some(2_000), Some(1)).unwrap();
        assert_eq!(workloads[0].kind, WorkloadKind::CpuBound);
        assert_eq!(workloads[0].param, 2_000);
        assert_eq!(workloads[1].case.name, "io_wait");

        let ctx = RuntimeContext::resolve("Rust", "test", &FixedProbe(LockMode::Parallel));
        let comparator = Comparator::standard(&in_process_only());
        let doc = run_concurrency(&ctx, &comparator, &workloads, 3, 2).unwrap();
        assert_eq!(doc.results.len(), 8);
        assert_eq!(doc.runtime.gil_disabled, Some(true));
        assert!(doc.check_invariants().is_ok());
        assert!(to_json(&doc).is_ok());
    }

    #[test]
    fn test_standard_workloads_need_catalog_entries() {
        let empty = Catalog::from_cases([]);
        assert!(matches!(
            standard_workloads(&empty, None, None),
            Err(EngineError::UnknownWorkload(_))
        ));
    }

    #[test]
    fn test_execute_task_classifies_failures() {
        let ok = execute_task(&sleeping(1).case, 1, 0);
        assert!(ok.unwrap() >= 0.001);

        let panicked = execute_task(&panicking().case, 0, 5).unwrap_err();
        assert_eq!(panicked.task_index, 5);
        assert_eq!(panicked.kind, TaskErrorKind::Panicked);
        assert!(panicked.message.contains("task exploded"));
    }
}
