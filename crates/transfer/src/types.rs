use serde::{Deserialize, Serialize};

/// A contiguous slice `[offset, offset + data.len())` of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the chunk sequence.
    pub seq: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length chunk.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Metadata announced once at transfer start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    /// Label chosen by the sender; not a path and not sanitized.
    pub file_name: String,
    pub total_size: u64,
}

impl TransferDescriptor {
    pub fn new(file_name: impl Into<String>, total_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
        }
    }
}

/// Which end of the transfer a session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
    Complete,
    Failed,
}

impl SessionState {
    /// Returns `true` for `Complete` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

/// Snapshot of a session's counters, derived locally from byte counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub role: Role,
    pub file_name: String,
    pub bytes_transferred: u64,
    pub total_size: u64,
    /// `floor(bytes_transferred * 100 / total_size)`, capped at 100.
    pub percent: u8,
    pub bytes_per_second: f64,
}
