//! Length-Prefixed Frame Encoding
//!
//! Message boundaries over the worker pipes (fd 3/4, or stdin/stdout).
//!
//! ```text
//! +----------------+------------------+
//! | length (4 LE)  | rkyv payload     |
//! +----------------+------------------+
//! ```

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Largest accepted frame. Task commands and outcomes are a few dozen bytes,
/// so anything near this size means the stream is out of sync.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Pipe buffer capacity on both ends
const PIPE_BUFFER_BYTES: usize = 8 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    /// Pipe read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// rkyv could not archive the message
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload failed archive validation
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced or produced size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Structurally invalid frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Peer closed the pipe between frames
    #[error("End of stream")]
    EndOfStream,
}

/// Archive `message` and write it as one frame, then flush.
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    // Peer blocks on this frame; never leave it sitting in the buffer.
    writer.flush()?;

    Ok(())
}

/// Read one frame and deserialize it after validating the archive.
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut prefix = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut prefix) {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::EndOfStream,
            _ => FrameError::Io(e),
        });
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    // rkyv needs an aligned buffer to validate in place
    let mut payload = rkyv::AlignedVec::with_capacity(len);
    payload.resize(len, 0);
    reader.read_exact(&mut payload)?;

    let archived = rkyv::check_archived_root::<T>(&payload)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    archived
        .deserialize(&mut Infallible)
        .map_err(|_| FrameError::Deserialization("infallible deserializer failed".to_string()))
}

/// Sending half of a worker pipe
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a raw pipe end
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(PIPE_BUFFER_BYTES, writer),
        }
    }

    /// Send one message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }
}

/// Receiving half of a worker pipe
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a raw pipe end
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(PIPE_BUFFER_BYTES, reader),
        }
    }

    /// Receive one message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Whether bytes are already buffered (a `poll` on the fd would miss them)
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureKind, SupervisorCommand, WorkerMessage};
    use std::io::Cursor;

    #[test]
    fn test_command_roundtrip() {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer
                .write(&SupervisorCommand::Run {
                    task_index: 7,
                    workload: "count_primes".to_string(),
                    param: 10_000,
                })
                .unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        match reader.read::<SupervisorCommand>().unwrap() {
            SupervisorCommand::Run {
                task_index,
                workload,
                param,
            } => {
                assert_eq!(task_index, 7);
                assert_eq!(workload, "count_primes");
                assert_eq!(param, 10_000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_messages_keep_boundaries() {
        let messages = vec![
            WorkerMessage::Complete {
                task_index: 0,
                elapsed_nanos: 1_500,
                value: 1229,
            },
            WorkerMessage::Failure {
                task_index: 1,
                kind: FailureKind::Panic,
                message: "boom".to_string(),
            },
            WorkerMessage::Complete {
                task_index: 2,
                elapsed_nanos: 2_500,
                value: -3,
            },
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for msg in &messages {
                writer.write(msg).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let mut indices = Vec::new();
        for _ in &messages {
            match reader.read::<WorkerMessage>().unwrap() {
                WorkerMessage::Complete { task_index, .. }
                | WorkerMessage::Failure { task_index, .. } => indices.push(task_index),
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let bytes = ((MAX_FRAME_SIZE as u32) + 1).to_le_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        let mut reader = FrameReader::new(Cursor::new(0u32.to_le_bytes().to_vec()));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::InvalidFrame(_))));
    }
}
