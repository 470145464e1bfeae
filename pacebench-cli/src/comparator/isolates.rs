//! Isolate strategy: worker threads that share nothing but two channels.
//!
//! Every isolate owns a private current-thread tokio runtime and its own copy
//! of the workload. The coordinator hands out one task at a time to whichever
//! isolate reports back, so a slow isolate never holds a backlog.

use super::{Strategy, StrategyRun, TaskPlan};
use pacebench_core::StrategyKind;

/// Isolated-runtime strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolateStrategy;

#[cfg(feature = "isolates")]
mod imp {
    use super::super::{ResultSink, TaskQueue, execute_task};
    use pacebench_core::{TaskError, TaskErrorKind, TaskOutcome, WorkloadCase};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    pub(super) enum IsolateEvent {
        Done {
            worker: usize,
            index: usize,
            outcome: TaskOutcome,
        },
        Failed {
            worker: usize,
            reason: String,
        },
    }

    pub(super) fn isolate_main(
        worker: usize,
        case: WorkloadCase,
        param: u64,
        mut tasks: UnboundedReceiver<usize>,
        events: UnboundedSender<IsolateEvent>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = events.send(IsolateEvent::Failed {
                    worker,
                    reason: format!("failed to create isolate runtime: {e}"),
                });
                return;
            }
        };

        runtime.block_on(async move {
            while let Some(index) = tasks.recv().await {
                let outcome = execute_task(&case, param, index);
                if events
                    .send(IsolateEvent::Done {
                        worker,
                        index,
                        outcome,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Demand-driven hand-out of task indices to isolates
    pub(super) struct Dispatcher {
        senders: Vec<Option<UnboundedSender<usize>>>,
        in_flight: Vec<Option<usize>>,
        queue: TaskQueue,
    }

    impl Dispatcher {
        pub(super) fn new(senders: Vec<Option<UnboundedSender<usize>>>, task_count: usize) -> Self {
            let in_flight = vec![None; senders.len()];
            Self {
                senders,
                in_flight,
                queue: TaskQueue::new(task_count),
            }
        }

        /// Give `worker` its next task, or close its channel when none remain
        pub(super) fn feed(&mut self, worker: usize, sink: &ResultSink) {
            while self.senders[worker].is_some() {
                let Some(index) = self.queue.next() else {
                    self.senders[worker] = None;
                    return;
                };
                let delivered = self.senders[worker]
                    .as_ref()
                    .is_some_and(|tx| tx.send(index).is_ok());
                if delivered {
                    self.in_flight[worker] = Some(index);
                    return;
                }
                self.senders[worker] = None;
                sink.record(
                    index,
                    Err(TaskError::new(
                        index,
                        TaskErrorKind::WorkerCrashed,
                        format!("isolate {worker} exited before accepting the task"),
                    )),
                );
            }
        }

        pub(super) fn complete(&mut self, worker: usize) {
            self.in_flight[worker] = None;
        }

        /// The isolate is gone: fail its in-flight task and stop feeding it
        pub(super) fn fail(&mut self, worker: usize, reason: &str, sink: &ResultSink) {
            self.senders[worker] = None;
            if let Some(index) = self.in_flight[worker].take() {
                sink.record(
                    index,
                    Err(TaskError::new(index, TaskErrorKind::WorkerCrashed, reason)),
                );
            }
        }

        pub(super) fn busy(&self) -> bool {
            self.in_flight.iter().any(Option::is_some)
        }

        pub(super) fn close(&mut self) {
            self.senders.iter_mut().for_each(|tx| *tx = None);
        }
    }
}

#[cfg(feature = "isolates")]
impl Strategy for IsolateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Subinterpreter
    }

    fn run(&self, plan: &TaskPlan) -> StrategyRun {
        use super::ResultSink;
        use imp::{Dispatcher, IsolateEvent, isolate_main};
        use std::time::Instant;
        use tokio::sync::mpsc;

        let start = Instant::now();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<IsolateEvent>();
        let mut senders = Vec::with_capacity(plan.worker_count);
        let mut threads = Vec::with_capacity(plan.worker_count);

        for worker in 0..plan.worker_count {
            let (task_tx, task_rx) = mpsc::unbounded_channel::<usize>();
            let events = event_tx.clone();
            let case = plan.workload.case;
            let param = plan.workload.param;
            let spawned = std::thread::Builder::new()
                .name(format!("pacebench-isolate-{worker}"))
                .spawn(move || isolate_main(worker, case, param, task_rx, events));
            match spawned {
                Ok(handle) => {
                    senders.push(Some(task_tx));
                    threads.push(handle);
                }
                Err(e) => {
                    tracing::warn!(worker, error = %e, "isolate thread failed to start");
                    senders.push(None);
                }
            }
        }
        drop(event_tx);

        if threads.is_empty() {
            return StrategyRun::Unsupported("cannot start isolate threads".to_string());
        }

        let sink = ResultSink::new(plan.task_count);
        let mut dispatcher = Dispatcher::new(senders, plan.task_count);
        for worker in 0..plan.worker_count {
            dispatcher.feed(worker, &sink);
        }

        while dispatcher.busy() {
            match event_rx.blocking_recv() {
                Some(IsolateEvent::Done {
                    worker,
                    index,
                    outcome,
                }) => {
                    sink.record(index, outcome);
                    dispatcher.complete(worker);
                    dispatcher.feed(worker, &sink);
                }
                Some(IsolateEvent::Failed { worker, reason }) => {
                    tracing::warn!(worker, %reason, "isolate failed");
                    dispatcher.fail(worker, &reason, &sink);
                }
                None => break,
            }
        }
        dispatcher.close();

        for handle in threads {
            if handle.join().is_err() {
                tracing::warn!("isolate thread panicked");
            }
        }

        StrategyRun::Ran {
            wall_seconds: start.elapsed().as_secs_f64(),
            outcomes: sink.into_outcomes(),
        }
    }
}

#[cfg(not(feature = "isolates"))]
impl Strategy for IsolateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Subinterpreter
    }

    fn availability(&self) -> super::Availability {
        super::Availability::Unsupported("built without the `isolates` feature".to_string())
    }

    fn run(&self, _plan: &TaskPlan) -> StrategyRun {
        StrategyRun::Unsupported("built without the `isolates` feature".to_string())
    }
}
