//! Chunked file transfer: chunking, per-transfer state machines and
//! reassembly.
//!
//! Everything here is synchronous and transport-agnostic. The link layer
//! feeds decoded protocol messages in and ships the resulting messages out.

mod chunked;
mod progress;
mod reassembler;
mod session;
mod source;
mod types;
mod validation;

use std::sync::Arc;

pub use chunked::{Chunker, calculate_file_checksum, checksum_bytes, chunk_count};
pub use progress::{SpeedCalculator, clamp_percent, percent};
pub use reassembler::{ReceivedFile, Reassembler};
pub use session::{ReceiveOutcome, ReceiveSession, SendSession};
pub use source::FileSource;
pub use types::{Chunk, Role, SessionState, TransferDescriptor, TransferProgress};
pub use validation::validate_file_name;

pub use peerdrop_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
///
/// Cloneable so one failure can be reported both as an event and as the
/// result of the transfer handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("failed to read source: {0}")]
    SourceRead(Arc<std::io::Error>),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer { received: u64, expected: u64 },

    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("aborted by peer: {0}")]
    Aborted(String),

    #[error("transfer stalled")]
    Stalled,

    #[error("cancelled")]
    Cancelled,

    #[error("an outbound transfer is already in progress")]
    TransferInProgress,

    #[error("invalid file name: {0}")]
    InvalidPath(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(Arc::new(err))
    }
}

impl TransferError {
    /// Wraps an I/O error raised while reading the file source.
    pub fn source_read(err: std::io::Error) -> Self {
        TransferError::SourceRead(Arc::new(err))
    }
}
