use std::io::{Cursor, Read};
use std::path::Path;

use crate::chunked::{Chunker, calculate_file_checksum, checksum_bytes};
use crate::types::TransferDescriptor;
use crate::TransferError;

/// A readable byte source with a known size and a display name.
///
/// The name is a label only. It is sent to the peer as-is and never
/// interpreted as a path on this side.
pub struct FileSource {
    name: String,
    size: u64,
    checksum: Option<String>,
    reader: Box<dyn Read + Send>,
}

impl FileSource {
    /// Opens a file on disk.
    ///
    /// The label is the path's final component and the whole-file SHA-256 is
    /// computed up front so the receiver can verify the reassembled blob.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path).map_err(TransferError::source_read)?;
        let size = file.metadata().map_err(TransferError::source_read)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let checksum = calculate_file_checksum(path)?;

        Ok(Self {
            name,
            size,
            checksum: Some(checksum),
            reader: Box::new(file),
        })
    }

    /// Wraps an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let checksum = checksum_bytes(&data);
        Self {
            name: name.into(),
            size: data.len() as u64,
            checksum: Some(checksum),
            reader: Box::new(Cursor::new(data)),
        }
    }

    /// Wraps an arbitrary reader that will yield exactly `size` bytes.
    ///
    /// No checksum is announced for such sources.
    pub fn from_reader(name: impl Into<String>, size: u64, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            size,
            checksum: None,
            reader: Box::new(reader),
        }
    }

    /// Overrides the announced checksum.
    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Overrides the label sent to the peer.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex SHA-256 of the content, when known.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Metadata announced in the `file-start` message.
    pub fn descriptor(&self) -> TransferDescriptor {
        TransferDescriptor::new(self.name.clone(), self.size)
    }

    /// Consumes the source into a chunk iterator.
    pub fn into_chunker(self, chunk_size: usize) -> Chunker {
        Chunker::new(self, chunk_size)
    }

    pub(crate) fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}
