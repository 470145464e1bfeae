//! Supervisor Process
//!
//! Spawns worker processes for the multiprocess strategy and drives them
//! one task at a time over framed IPC.

use pacebench_ipc::{
    FailureKind, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION,
    SupervisorCommand, WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures of the supervisor side of a worker pipe
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Framing or transport failure
    #[error("IPC error: {0}")]
    IpcError(String),

    /// The worker died before answering
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker did not answer within the task timeout
    #[error("Timeout waiting for worker")]
    Timeout,

    /// The worker answered out of protocol
    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError {
        /// What the supervisor was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

/// Answer of a worker to one `Run`
#[derive(Debug, Clone, PartialEq)]
pub enum TaskReply {
    /// The workload returned a value
    Completed {
        /// Time spent inside the workload call, measured in the worker
        elapsed: Duration,
        /// Returned value
        value: i64,
    },
    /// The workload failed inside the worker
    Failed {
        /// Failure category
        kind: FailureKind,
        /// Failure detail
        message: String,
    },
}

#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Even a closing pipe may still hold a complete frame
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a close-on-exec pipe, returning (read_fd, write_fd)
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// How long `poll` blocks before re-checking the child and the deadline
const POLL_SLICE: Duration = Duration::from_millis(100);

/// How long a SIGTERM'd worker gets to exit before SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// How long [`WorkerHandle::ping`] waits for the `Pong`
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// One live worker process
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: WorkerCapabilities,
    timeout: Option<Duration>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn this executable as a worker
    pub fn spawn(timeout: Option<Duration>) -> Result<Self, SupervisorError> {
        let binary = std::env::current_exe().map_err(SupervisorError::SpawnFailed)?;
        Self::spawn_binary(&binary, timeout)
    }

    /// Spawn `binary --pacebench-worker` with commands on fd 3 and
    /// messages on fd 4, and wait for its handshake
    pub fn spawn_binary(binary: &Path, timeout: Option<Duration>) -> Result<Self, SupervisorError> {
        // cmd pipe: supervisor writes -> worker reads on fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: worker writes on fd 4 -> supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            command.pre_exec(move || {
                // Park both ends above the target slots first so that a pipe
                // end already sitting on 3 or 4 is not clobbered by dup2.
                let cmd = libc::fcntl(cmd_read, libc::F_DUPFD, 10);
                let msg = libc::fcntl(msg_write, libc::F_DUPFD, 10);
                if cmd < 0 || msg < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // dup2 leaves the new descriptors without FD_CLOEXEC
                if libc::dup2(cmd, 3) < 0 || libc::dup2(msg, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(cmd);
                libc::close(msg);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Close the child-side ends so a dead worker shows up as POLLHUP
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let mut reader = FrameReader::new(unsafe { std::fs::File::from_raw_fd(msg_read) });

        let capabilities = match Self::read_hello(&mut reader) {
            Ok(caps) => caps,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        tracing::debug!(
            pid = capabilities.pid,
            workloads = capabilities.workload_count,
            "worker ready"
        );

        Ok(Self {
            child,
            reader,
            writer: FrameWriter::new(writer_file),
            capabilities,
            timeout,
            msg_read_fd: msg_read,
        })
    }

    /// Wait for Hello and check the protocol version
    fn read_hello(
        reader: &mut FrameReader<std::fs::File>,
    ) -> Result<WorkerCapabilities, SupervisorError> {
        let msg: WorkerMessage = match reader.read() {
            Ok(msg) => msg,
            Err(FrameError::EndOfStream) => {
                return Err(SupervisorError::WorkerCrashed(
                    "worker exited before handshake".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        match msg {
            WorkerMessage::Hello(caps) if caps.protocol_version == PROTOCOL_VERSION => Ok(caps),
            WorkerMessage::Hello(caps) => Err(SupervisorError::ProtocolError {
                expected: format!("protocol version {PROTOCOL_VERSION}"),
                got: format!("protocol version {}", caps.protocol_version),
            }),
            other => Err(SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Capabilities reported during handshake
    pub fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }

    /// Run one task and wait for its reply.
    ///
    /// On `Timeout` the worker has been terminated and the handle must be
    /// dropped.
    pub fn run_task(
        &mut self,
        task_index: usize,
        workload: &str,
        param: u64,
    ) -> Result<TaskReply, SupervisorError> {
        let task_index = u32::try_from(task_index)
            .map_err(|_| SupervisorError::IpcError(format!("task index {task_index} exceeds u32")))?;

        self.writer.write(&SupervisorCommand::Run {
            task_index,
            workload: workload.to_string(),
            param,
        })?;

        let msg = self.await_reply(self.timeout)?;
        match msg {
            WorkerMessage::Complete {
                task_index: idx,
                elapsed_nanos,
                value,
            } if idx == task_index => Ok(TaskReply::Completed {
                elapsed: Duration::from_nanos(elapsed_nanos),
                value,
            }),
            WorkerMessage::Failure {
                task_index: idx,
                kind,
                message,
            } if idx == task_index => Ok(TaskReply::Failed { kind, message }),
            other => Err(SupervisorError::ProtocolError {
                expected: format!("reply for task {task_index}"),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Next message from the worker. Past `limit` the worker is terminated
    /// and `Timeout` returned.
    fn await_reply(&mut self, limit: Option<Duration>) -> Result<WorkerMessage, SupervisorError> {
        let start = Instant::now();
        loop {
            let slice = match limit {
                Some(limit) => {
                    let remaining = limit.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        self.terminate();
                        return Err(SupervisorError::Timeout);
                    }
                    remaining.min(POLL_SLICE)
                }
                None => POLL_SLICE,
            };

            // Buffered bytes may be an incomplete frame that never completes
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(SupervisorError::WorkerCrashed(
                        "worker exited with a partial frame buffered".to_string(),
                    ));
                }
            } else {
                match wait_for_data(self.msg_read_fd, slice.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                    }
                    PollResult::Error(e) => {
                        return Err(SupervisorError::WorkerCrashed(format!("pipe error: {e}")));
                    }
                }
            }

            return match self.reader.read() {
                Ok(msg) => Ok(msg),
                Err(FrameError::EndOfStream) => {
                    Err(SupervisorError::WorkerCrashed(self.exit_description()))
                }
                Err(e) => {
                    if !self.is_alive() {
                        return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                    }
                    Err(e.into())
                }
            };
        }
    }

    /// SIGTERM, short grace period, then SIGKILL
    fn terminate(&mut self) {
        let _ = send_sigterm(self.child.id());
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn exit_description(&mut self) -> String {
        // Give the kernel a moment to publish the exit status
        for _ in 0..20 {
            if let Ok(Some(status)) = self.child.try_wait() {
                return format!("worker process exited: {status}");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        "worker closed its pipe".to_string()
    }

    /// Check the worker is alive and still reading commands.
    ///
    /// Waits up to [`PING_TIMEOUT`] for the `Pong`; a worker that misses it
    /// is terminated.
    pub fn ping(&mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Ping)?;
        match self.await_reply(Some(PING_TIMEOUT))? {
            WorkerMessage::Pong => Ok(()),
            other => Err(SupervisorError::ProtocolError {
                expected: "Pong".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Ask the worker to exit and reap it
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Shutdown)?;
        let _ = self.child.wait();
        Ok(())
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            self.terminate();
        }
    }
}

/// Where worker processes come from
#[derive(Debug, Clone, Default)]
pub struct WorkerLauncher {
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl WorkerLauncher {
    /// Launcher for `binary` (this executable when `None`)
    pub fn new(binary: Option<PathBuf>, timeout: Option<Duration>) -> Self {
        Self { binary, timeout }
    }

    /// Binary that will be executed
    pub fn binary(&self) -> std::io::Result<PathBuf> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe(),
        }
    }

    /// Start one worker
    pub fn launch(&self) -> Result<WorkerHandle, SupervisorError> {
        let binary = self.binary()?;
        WorkerHandle::spawn_binary(&binary, self.timeout)
    }
}
