//! Threaded strategy: shared-memory workers on a dedicated rayon pool.
//!
//! Each worker pulls indices from one [`TaskQueue`]. With `global_lock` set
//! every CPU-bound task body runs behind a single mutex, reproducing a
//! runtime whose interpreter lock serializes compute. IO-bound bodies run
//! outside the lock, as such a lock is released across blocking waits.

use super::{ResultSink, Strategy, StrategyRun, TaskPlan, TaskQueue, execute_task};
use pacebench_core::{StrategyKind, WorkloadKind};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Worker-thread strategy
#[derive(Debug, Default)]
pub struct ThreadedStrategy {
    global_lock: Option<Mutex<()>>,
}

impl ThreadedStrategy {
    /// Threaded strategy, optionally serialized behind one lock
    pub fn new(global_lock: bool) -> Self {
        Self {
            global_lock: global_lock.then(|| Mutex::new(())),
        }
    }
}

impl Strategy for ThreadedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Threaded
    }

    fn run(&self, plan: &TaskPlan) -> StrategyRun {
        let start = Instant::now();
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(plan.worker_count)
            .thread_name(|i| format!("pacebench-thread-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => return StrategyRun::Unsupported(format!("cannot start worker threads: {e}")),
        };

        let case = plan.workload.case;
        let param = plan.workload.param;
        let lock = self
            .global_lock
            .as_ref()
            .filter(|_| plan.workload.kind == WorkloadKind::CpuBound);
        let queue = TaskQueue::new(plan.task_count);
        let sink = ResultSink::new(plan.task_count);

        pool.scope(|scope| {
            for _ in 0..plan.worker_count {
                scope.spawn(|_| {
                    while let Some(idx) = queue.next() {
                        let outcome = match lock {
                            Some(lock) => {
                                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                                execute_task(&case, param, idx)
                            }
                            None => execute_task(&case, param, idx),
                        };
                        sink.record(idx, outcome);
                    }
                });
            }
        });

        StrategyRun::Ran {
            wall_seconds: start.elapsed().as_secs_f64(),
            outcomes: sink.into_outcomes(),
        }
    }
}
