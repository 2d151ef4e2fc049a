use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunked::checksum_bytes;
use crate::types::TransferDescriptor;
use crate::validation::validate_file_name;
use crate::TransferError;

/// Receiver-side accumulator for one transfer.
///
/// Chunks are kept as they arrive and concatenated once, into a buffer sized
/// to the announced total, when the transfer completes.
#[derive(Debug)]
pub struct Reassembler {
    descriptor: TransferDescriptor,
    expected_checksum: Option<String>,
    chunks: Vec<Vec<u8>>,
    buffered: u64,
    finalized: Option<ReceivedFile>,
}

impl Reassembler {
    /// Creates an empty accumulator. When `expected_checksum` is set the
    /// finalized blob is verified against it.
    pub fn new(descriptor: TransferDescriptor, expected_checksum: Option<String>) -> Self {
        Self {
            descriptor,
            expected_checksum,
            chunks: Vec::new(),
            buffered: 0,
            finalized: None,
        }
    }

    /// Appends one chunk payload.
    ///
    /// Fails once the accumulator has been finalized.
    pub fn push(&mut self, data: Vec<u8>) -> Result<(), TransferError> {
        if self.finalized.is_some() {
            return Err(TransferError::ProtocolViolation(format!(
                "chunk for {} after finalization",
                self.descriptor.file_name
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.buffered += data.len() as u64;
        self.chunks.push(data);
        Ok(())
    }

    /// Bytes accumulated so far.
    pub fn buffered(&self) -> u64 {
        self.buffered
    }

    /// Number of non-empty chunks held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    /// Concatenates the accumulated chunks into the final blob.
    ///
    /// Runs at most once: later calls return the same [`ReceivedFile`]
    /// without touching the data again.
    pub fn finalize(&mut self) -> Result<ReceivedFile, TransferError> {
        if let Some(file) = &self.finalized {
            return Ok(file.clone());
        }

        let expected = self.descriptor.total_size;
        if self.buffered != expected {
            return Err(TransferError::LengthMismatch {
                expected,
                actual: self.buffered,
            });
        }

        let mut data = Vec::with_capacity(self.buffered as usize);
        for chunk in self.chunks.drain(..) {
            data.extend_from_slice(&chunk);
        }

        let checksum = match self.expected_checksum.as_deref() {
            Some(expected) => {
                let actual = checksum_bytes(&data);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(TransferError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    });
                }
                Some(actual)
            }
            None => None,
        };

        let file = ReceivedFile {
            file_name: self.descriptor.file_name.clone(),
            data: Arc::new(data),
            checksum,
        };
        self.finalized = Some(file.clone());
        Ok(file)
    }
}

/// A completely received file: the announced label plus its bytes.
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    file_name: String,
    data: Arc<Vec<u8>>,
    checksum: Option<String>,
}

impl ReceivedFile {
    /// Label announced by the sender. Not sanitized.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Verified SHA-256, when the sender announced one.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Takes the bytes out, copying only if the buffer is still shared.
    pub fn into_bytes(self) -> Vec<u8> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    /// Writes the blob to `dir/<file_name>`.
    ///
    /// The label must be a single plain file name; anything that could
    /// escape `dir` is rejected with [`TransferError::InvalidPath`].
    pub fn save_into(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        validate_file_name(&self.file_name)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, self.bytes())?;
        tracing::info!(path = %path.display(), size = self.len(), "received file saved");
        Ok(path)
    }
}
