#![warn(missing_docs)]
//! # pacebench
//!
//! Cross-runtime workload benchmarks and concurrency strategy comparison.
//!
//! pacebench measures a fixed catalog of small workloads and records the
//! results in versioned JSON documents keyed by runtime identity:
//! - **Micro runs**: repeat/iteration batched wall-clock timing per workload
//! - **Concurrency runs**: the same CPU-bound and IO-bound tasks executed
//!   sequentially, on worker threads, in worker processes and in isolates
//! - **Fail-Late**: a failing, panicking or crashing task is recorded by index
//!   and the comparison carries on
//! - **Zero-Copy IPC**: worker processes are driven over rkyv frames
//! - **Aggregation**: documents from many runs are summarized per runtime
//!
//! ## Quick Start
//!
//! ```ignore
//! use pacebench::prelude::*;
//!
//! let ctx = RuntimeContext::native(&NativeThreadsProbe);
//! let catalog = Catalog::discover();
//! let workloads = standard_workloads(&catalog, Some(20_000), Some(5))?;
//! let comparator = Comparator::standard(&StrategyOptions::default());
//! let doc = run_concurrency(&ctx, &comparator, &workloads, 8, 4)?;
//! println!("{}", to_json(&doc)?);
//! ```

// Re-export core types
pub use pacebench_core::{
    Catalog, ConcurrencyTaskResult, ConcurrencyWorkload, EngineError, EnvProbe, FixedProbe,
    LockMode, LockModeProbe, NativeThreadsProbe, ResultShape, RunResult, RuntimeContext,
    RuntimeIdentity, StrategyKind, StrategyStatus, StrategySupport, Suite, TaskError,
    TaskErrorKind, TaskOutcome, WorkloadCase, WorkloadError, WorkloadFn, WorkloadKind, measure,
    measure_all,
};

// Re-export documents and aggregation
pub use pacebench_report::{
    BenchmarkDocument, CaseSummary, ConcurrencyDocument, ConcurrencySummaryEntry, Document,
    DocumentKey, DocumentKind, ReportError, StrategySummary, Summary, SummaryEntry,
    aggregate_concurrency_documents, aggregate_documents, aggregate_documents_against,
    from_document, to_json,
};

// Re-export stats
pub use pacebench_stats::{StatsError, aggregate, describe};

// Re-export the comparator and configuration
pub use pacebench_cli::{
    Comparator, PacebenchConfig, Strategies, Strategy, StrategyOptions, measure_catalog,
    run_concurrency, standard_workloads,
};

/// Internal re-exports for workload registration
#[doc(hidden)]
pub mod internal {
    pub use pacebench_core::inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Catalog, Comparator, NativeThreadsProbe, RuntimeContext, StrategyOptions, WorkloadCase,
        run_concurrency, standard_workloads, to_json,
    };
}

/// Run the pacebench CLI.
///
/// Call this from a host binary's `main()`:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     pacebench::run()
/// }
/// ```
pub use pacebench_cli::run;
