use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::source::FileSource;
use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path).map_err(TransferError::source_read)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(TransferError::source_read)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Number of chunks needed to cover `total_size` bytes: `ceil(total / chunk)`.
pub fn chunk_count(total_size: u64, chunk_size: usize) -> u64 {
    let chunk_size = effective_chunk_size(chunk_size) as u64;
    total_size.div_ceil(chunk_size)
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Splits a [`FileSource`] into ordered, gap-free chunks.
///
/// The sequence is lazy and single-pass: each call to `next` reads at most
/// one chunk from the source. After the last chunk, or after the first read
/// error, the iterator is exhausted.
pub struct Chunker {
    reader: Box<dyn Read + Send>,
    chunk_size: usize,
    offset: u64,
    total_size: u64,
    seq: u64,
    exhausted: bool,
}

impl Chunker {
    /// Creates a chunker over `source`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (64 KiB) is used.
    pub fn new(source: FileSource, chunk_size: usize) -> Self {
        let total_size = source.size();
        Self {
            reader: source.into_reader(),
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
            total_size,
            seq: 0,
            exhausted: false,
        }
    }

    /// Reads the next chunk. Returns `None` once `total_size` bytes were produced.
    ///
    /// A source that ends before its announced size yields a
    /// [`TransferError::SourceRead`].
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.exhausted || self.remaining() == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        let read_size = self.remaining().min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            self.exhausted = true;
            return Err(TransferError::source_read(e));
        }

        let chunk = Chunk {
            seq: self.seq,
            offset: self.offset,
            data: buf,
        };
        self.offset += read_size as u64;
        self.seq += 1;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.total_size - self.offset
    }

    /// Chunk size in use.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Iterator for Chunker {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
