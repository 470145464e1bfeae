#![warn(missing_docs)]
//! pacebench IPC Protocol
//!
//! Wire protocol between the multiprocess strategy's supervisor threads and
//! their worker processes. Messages are rkyv archives wrapped in
//! length-prefixed frames, validated on read.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{FailureKind, SupervisorCommand, WorkerCapabilities, WorkerMessage};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 2;

/// Command-line flag that switches the host binary into worker mode
pub const WORKER_FLAG: &str = "--pacebench-worker";

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "PACEBENCH_IPC_FD";
