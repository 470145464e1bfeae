//! Multiprocess strategy: isolated worker processes, one task per request.
//!
//! Each of `worker_count` supervisor loops owns at most one worker process
//! and feeds it indices from the shared queue. A worker that dies or times
//! out costs exactly the task it was running; the loop starts a fresh one for
//! the next task.

use super::{Strategy, StrategyRun, TaskPlan};
use pacebench_core::StrategyKind;
use std::path::PathBuf;
use std::time::Duration;

/// Worker-process strategy
#[derive(Debug, Clone, Default)]
pub struct MultiprocessStrategy {
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl MultiprocessStrategy {
    /// Strategy launching `binary` (this executable when `None`)
    pub fn new(binary: Option<PathBuf>, timeout: Option<Duration>) -> Self {
        Self { binary, timeout }
    }
}

#[cfg(unix)]
impl Strategy for MultiprocessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Multiprocess
    }

    fn run(&self, plan: &TaskPlan) -> StrategyRun {
        use super::{ResultSink, TaskQueue};
        use crate::supervisor::WorkerLauncher;
        use std::time::Instant;

        let launcher = WorkerLauncher::new(self.binary.clone(), self.timeout);
        if let Err(e) = launcher.binary() {
            return StrategyRun::Unsupported(format!("cannot locate worker binary: {e}"));
        }

        let start = Instant::now();
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(plan.worker_count)
            .thread_name(|i| format!("pacebench-supervisor-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                return StrategyRun::Unsupported(format!("cannot start supervisor threads: {e}"));
            }
        };

        let queue = TaskQueue::new(plan.task_count);
        let sink = ResultSink::new(plan.task_count);
        let workload = plan.workload.case.name;
        let param = plan.workload.param;

        pool.scope(|scope| {
            for slot in 0..plan.worker_count {
                let (launcher, queue, sink) = (&launcher, &queue, &sink);
                scope.spawn(move |_| supervise(slot, launcher, queue, sink, workload, param));
            }
        });

        StrategyRun::Ran {
            wall_seconds: start.elapsed().as_secs_f64(),
            outcomes: sink.into_outcomes(),
        }
    }
}

#[cfg(unix)]
fn supervise(
    slot: usize,
    launcher: &crate::supervisor::WorkerLauncher,
    queue: &super::TaskQueue,
    sink: &super::ResultSink,
    workload: &str,
    param: u64,
) {
    use crate::supervisor::{SupervisorError, TaskReply, WorkerHandle};
    use pacebench_core::{TaskError, TaskErrorKind};
    use pacebench_ipc::FailureKind;

    let mut worker: Option<WorkerHandle> = None;

    while let Some(idx) = queue.next() {
        let mut handle = match worker.take() {
            Some(handle) => handle,
            None => match launcher.launch() {
                Ok(handle) => {
                    tracing::debug!(slot, pid = handle.capabilities().pid, "worker started");
                    handle
                }
                Err(e) => {
                    tracing::warn!(slot, task_index = idx, error = %e, "worker failed to start");
                    sink.record(
                        idx,
                        Err(TaskError::new(idx, TaskErrorKind::WorkerCrashed, e.to_string())),
                    );
                    continue;
                }
            },
        };

        let outcome = match handle.run_task(idx, workload, param) {
            Ok(TaskReply::Completed { elapsed, .. }) => {
                worker = Some(handle);
                Ok(elapsed.as_secs_f64())
            }
            Ok(TaskReply::Failed { kind, message }) => {
                worker = Some(handle);
                let kind = match kind {
                    FailureKind::Panic => TaskErrorKind::Panicked,
                    FailureKind::Workload | FailureKind::UnknownWorkload => {
                        TaskErrorKind::WorkloadError
                    }
                };
                Err(TaskError::new(idx, kind, message))
            }
            Err(SupervisorError::Timeout) => {
                tracing::warn!(slot, task_index = idx, "worker timed out; replacing it");
                Err(TaskError::new(
                    idx,
                    TaskErrorKind::TimedOut,
                    "worker did not answer within the task timeout",
                ))
            }
            Err(e) => {
                tracing::warn!(slot, task_index = idx, error = %e, "worker lost; replacing it");
                Err(TaskError::new(idx, TaskErrorKind::WorkerCrashed, e.to_string()))
            }
        };
        sink.record(idx, outcome);
    }

    if let Some(handle) = worker {
        if let Err(e) = handle.shutdown() {
            tracing::debug!(slot, error = %e, "worker shutdown was not clean");
        }
    }
}

#[cfg(not(unix))]
impl Strategy for MultiprocessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Multiprocess
    }

    fn availability(&self) -> super::Availability {
        super::Availability::Unsupported(
            "worker processes need fork/exec pipe inheritance, available on unix only".to_string(),
        )
    }

    fn run(&self, _plan: &TaskPlan) -> StrategyRun {
        StrategyRun::Unsupported("multiprocess strategy is unix-only".to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::comparator::{Availability, Comparator};
    use crate::comparator::test_support::sleeping;
    use pacebench_core::{StrategyStatus, TaskErrorKind};

    #[test]
    fn test_unlaunchable_worker_fails_every_task() {
        let strategy = MultiprocessStrategy::new(
            Some(PathBuf::from("/nonexistent/pacebench-worker-binary")),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(strategy.availability(), Availability::Available);

        let comparator = Comparator::new(vec![Box::new(strategy)]);
        let results = comparator.compare(&sleeping(1), 5, 2).unwrap();
        let result = &results[0];
        assert_eq!(result.errors.len(), 5);
        assert!(
            result
                .errors
                .iter()
                .all(|e| e.kind == TaskErrorKind::WorkerCrashed)
        );
        assert!(matches!(result.status, StrategyStatus::Failed { .. }));
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_worker_exiting_immediately_is_a_crash() {
        let comparator = Comparator::new(vec![Box::new(MultiprocessStrategy::new(
            Some(PathBuf::from("/bin/true")),
            None,
        ))]);
        let results = comparator.compare(&sleeping(1), 3, 1).unwrap();
        assert!(
            results[0]
                .errors
                .iter()
                .all(|e| e.kind == TaskErrorKind::WorkerCrashed)
        );
        let mut indices: Vec<usize> = results[0].errors.iter().map(|e| e.task_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
