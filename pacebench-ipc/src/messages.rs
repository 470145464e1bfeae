//! IPC Message Types
//!
//! A worker process handles one task at a time: the supervisor sends `Run`,
//! the worker answers with exactly one `Complete` or `Failure` carrying the
//! same task index.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Worker process id (for logs)
    pub pid: u32,
    /// Number of logical CPUs the worker sees
    pub cpu_count: u32,
    /// Number of workloads registered in the worker's catalog
    pub workload_count: u32,
}

impl WorkerCapabilities {
    /// Capabilities of the current process with `workload_count` catalog entries
    pub fn current(workload_count: usize) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: num_cpus(),
            workload_count: workload_count as u32,
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Task finished
    Complete {
        /// Index of the task within the strategy run
        task_index: u32,
        /// Time spent inside the workload call
        elapsed_nanos: u64,
        /// Value returned by the workload
        value: i64,
    },

    /// Task failed inside the worker
    Failure {
        /// Index of the task within the strategy run
        task_index: u32,
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },

    /// Reply to [`SupervisorCommand::Ping`]
    Pong,
}

/// Categories of in-worker task failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Workload panicked (caught)
    Panic,
    /// Workload returned an error
    Workload,
    /// Workload name not present in the worker's catalog
    UnknownWorkload,
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run one task
    Run {
        /// Index of the task within the strategy run
        task_index: u32,
        /// Catalog name of the workload
        workload: String,
        /// Workload parameter
        param: u64,
    },

    /// Health check; answered with [`WorkerMessage::Pong`]
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}
