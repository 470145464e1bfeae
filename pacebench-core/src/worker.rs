//! Worker Process Entry Point
//!
//! The isolated-memory side of the multiprocess strategy. The host binary
//! re-executes itself with `--pacebench-worker` and lands here.
//!
//! On Unix the worker talks over the fd pair named in `PACEBENCH_IPC_FD`
//! and installs a SIGTERM handler for graceful shutdown. Elsewhere it falls
//! back to stdin/stdout and skips signal handling.

use crate::catalog::Catalog;
use crate::panic_message;
use pacebench_ipc::{
    FailureKind, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, SupervisorCommand,
    WorkerCapabilities, WorkerMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Set by the SIGTERM handler
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// The handler only stores an atomic, which is async-signal-safe.
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn parse_fd_pair(value: &str) -> Option<(i32, i32)> {
    let (read, write) = value.split_once(',')?;
    Some((read.trim().parse().ok()?, write.trim().parse().ok()?))
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((read_fd, write_fd)) = parse_fd_pair(&val) {
            return IpcTransport::Fds { read_fd, write_fd };
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop: answer each `Run` with one `Complete` or `Failure`
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
    catalog: Catalog,
}

impl WorkerMain {
    /// Worker on the inherited fd pair if `PACEBENCH_IPC_FD` is set,
    /// otherwise on stdin/stdout
    pub fn new() -> Self {
        let catalog = Catalog::discover();
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // SAFETY: the supervisor dup2'd both pipe ends onto these fds
                // before exec, and nothing else in this process owns them.
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_io(Box::new(read_file), Box::new(write_file), catalog)
            }
            IpcTransport::Stdio => Self::with_io(
                Box::new(std::io::stdin()),
                Box::new(std::io::stdout()),
                catalog,
            ),
        }
    }

    /// Worker over arbitrary streams, resolving workloads from `catalog`
    pub fn with_io(
        reader: Box<dyn std::io::Read>,
        writer: Box<dyn std::io::Write>,
        catalog: Catalog,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            catalog,
        }
    }

    /// Handshake, then serve commands until `Shutdown`, SIGTERM or EOF
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::current(self.catalog.len())))?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            match command {
                SupervisorCommand::Run {
                    task_index,
                    workload,
                    param,
                } => self.run_task(task_index, &workload, param)?,
                SupervisorCommand::Ping => self.writer.write(&WorkerMessage::Pong)?,
                SupervisorCommand::Shutdown => break,
            }
        }

        Ok(())
    }

    fn run_task(&mut self, task_index: u32, workload: &str, param: u64) -> Result<(), FrameError> {
        let Some(case) = self.catalog.get(workload).copied() else {
            return self.writer.write(&WorkerMessage::Failure {
                task_index,
                kind: FailureKind::UnknownWorkload,
                message: format!("workload not found: {workload}"),
            });
        };

        let start = Instant::now();
        let outcome = std::panic::catch_unwind(move || case.call(param));
        let elapsed_nanos = start.elapsed().as_nanos() as u64;

        let message = match outcome {
            Ok(Ok(value)) => WorkerMessage::Complete {
                task_index,
                elapsed_nanos,
                value,
            },
            Ok(Err(err)) => WorkerMessage::Failure {
                task_index,
                kind: FailureKind::Workload,
                message: err.to_string(),
            },
            Err(panic) => WorkerMessage::Failure {
                task_index,
                kind: FailureKind::Panic,
                message: panic_message(panic.as_ref()),
            },
        };
        self.writer.write(&message)
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacebench_ipc::{read_frame, write_frame};
    use std::io::{BufReader, BufWriter, Cursor};
    use std::sync::{Arc, Mutex};

    /// Write half that stays inspectable after the worker is dropped
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn script(commands: &[SupervisorCommand]) -> Vec<u8> {
        let mut input = BufWriter::new(Vec::new());
        for command in commands {
            write_frame(&mut input, command).unwrap();
        }
        input.into_inner().unwrap()
    }

    fn replies(buf: &SharedBuf) -> Vec<WorkerMessage> {
        let bytes = buf.0.lock().unwrap().clone();
        let mut reader = BufReader::new(Cursor::new(bytes));
        let mut messages = Vec::new();
        while let Ok(message) = read_frame::<_, WorkerMessage>(&mut reader) {
            messages.push(message);
        }
        messages
    }

    fn run_script(commands: &[SupervisorCommand]) -> Vec<WorkerMessage> {
        let out = SharedBuf::default();
        let mut worker = WorkerMain::with_io(
            Box::new(Cursor::new(script(commands))),
            Box::new(out.clone()),
            Catalog::discover(),
        );
        worker.run().unwrap();
        replies(&out)
    }

    fn run(task_index: u32, workload: &str, param: u64) -> SupervisorCommand {
        SupervisorCommand::Run {
            task_index,
            workload: workload.to_string(),
            param,
        }
    }

    #[test]
    fn test_parse_fd_pair() {
        assert_eq!(parse_fd_pair("3,4"), Some((3, 4)));
        assert_eq!(parse_fd_pair(" 3 , 4 "), Some((3, 4)));
        assert_eq!(parse_fd_pair("3"), None);
        assert_eq!(parse_fd_pair("a,4"), None);
    }

    #[test]
    fn test_hello_then_complete() {
        let messages = run_script(&[run(7, "prime_sieve_5000", 5_000), SupervisorCommand::Shutdown]);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            WorkerMessage::Hello(caps) => {
                assert_eq!(caps.protocol_version, pacebench_ipc::PROTOCOL_VERSION);
                assert!(caps.workload_count > 0);
            }
            other => panic!("expected Hello, got {other:?}"),
        }
        match &messages[1] {
            WorkerMessage::Complete {
                task_index, value, ..
            } => {
                assert_eq!(*task_index, 7);
                assert_eq!(*value, 669);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn test_ping_is_answered_in_order() {
        let messages = run_script(&[
            SupervisorCommand::Ping,
            run(3, "prime_sieve_5000", 5_000),
            SupervisorCommand::Ping,
            SupervisorCommand::Shutdown,
            SupervisorCommand::Ping,
        ]);
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[1], WorkerMessage::Pong));
        assert!(matches!(messages[2], WorkerMessage::Complete { task_index: 3, .. }));
        assert!(matches!(messages[3], WorkerMessage::Pong));
    }

    #[test]
    fn test_failures_are_reported_per_task() {
        let messages = run_script(&[
            run(0, "diagnostic_fail", 0),
            run(1, "diagnostic_panic", 0),
            run(2, "no_such_workload", 0),
        ]);
        // Hello + three failures, then EOF
        assert_eq!(messages.len(), 4);
        let kinds: Vec<(u32, FailureKind)> = messages[1..]
            .iter()
            .map(|m| match m {
                WorkerMessage::Failure {
                    task_index, kind, ..
                } => (*task_index, *kind),
                other => panic!("expected Failure, got {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (0, FailureKind::Workload),
                (1, FailureKind::Panic),
                (2, FailureKind::UnknownWorkload),
            ]
        );
    }
}
