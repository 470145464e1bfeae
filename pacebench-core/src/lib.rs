#![warn(missing_docs)]
//! pacebench Core - Catalog, Measurement and Worker Runtime
//!
//! This crate provides the pieces every execution strategy shares:
//! - `Catalog` of named, pure workloads registered through `inventory`
//! - `measure` for repeat/iteration batched timing
//! - `RuntimeContext` resolved once per run, with a pluggable lock-mode probe
//! - Concurrency result types shared by the comparator and the aggregator
//! - `WorkerMain`, the entry point of isolated-memory worker processes

mod catalog;
mod concurrency;
mod context;
mod measure;
mod worker;
mod workloads;

pub use catalog::{Catalog, ResultShape, Suite, WorkloadCase, WorkloadError, WorkloadFn};
pub use concurrency::{
    ConcurrencyTaskResult, ConcurrencyWorkload, StrategyKind, StrategyStatus, StrategySupport,
    TaskError, TaskErrorKind, TaskOutcome, WorkloadKind,
};
pub use context::{
    EnvProbe, FixedProbe, LockMode, LockModeProbe, NativeThreadsProbe, RuntimeContext,
    RuntimeIdentity,
};
pub use measure::{DERIVED_TOLERANCE, RunResult, measure, measure_all};
pub use worker::WorkerMain;
pub use workloads::{
    bubble_sort, count_primes, fibonacci, fibonacci_recursive, io_wait, json_roundtrip,
    prime_sieve, threaded_trigonometry,
};

#[doc(hidden)]
pub use inventory;

use thiserror::Error;

/// Errors surfaced by the measurement engine and the catalog
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A count parameter (iterations, repeat, tasks, workers) was out of range
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The workload failed or panicked while being measured
    #[error("workload `{case}` failed: {message}")]
    WorkloadExecution {
        /// Case name
        case: String,
        /// Failure description
        message: String,
    },

    /// No catalog entry has this name
    #[error("unknown workload `{0}`")]
    UnknownWorkload(String),

    /// Statistics were requested over nothing
    #[error(transparent)]
    Stats(#[from] pacebench_stats::StatsError),
}

impl EngineError {
    /// `InvalidParameter` unless `value >= 1`
    pub fn ensure_positive(name: &'static str, value: u64) -> Result<(), EngineError> {
        if value == 0 {
            Err(EngineError::InvalidParameter {
                name,
                reason: "must be at least 1".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Extract a printable message from a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
