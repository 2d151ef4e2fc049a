//! Frame codec: maps [`TransferMessage`]s onto connection frames.
//!
//! Control messages travel as JSON text frames. Chunks travel as binary
//! frames so payload bytes are never re-encoded:
//!
//! ```text
//! [4 bytes BE: header_len][header_len bytes: JSON header][rest: raw payload]
//! ```
//!
//! The JSON header of a chunk frame is `{"type":"file-chunk","fileName":..,"seq":..}`.

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_FRAME_SIZE, MAX_HEADER_SIZE, MessageKind};
use crate::messages::{ChunkMessage, TransferMessage};

/// A unit of data carried by a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors from encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("unexpected message kind in binary frame: {0}")]
    UnexpectedKind(String),
}

/// JSON header preceding the raw payload of a binary chunk frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkHeader {
    #[serde(rename = "type")]
    msg_type: String,
    file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

/// Encodes a message into the frame it travels in.
///
/// Chunks become binary frames, everything else a JSON text frame.
pub fn encode(msg: &TransferMessage) -> Result<Frame, CodecError> {
    match msg {
        TransferMessage::Chunk(chunk) => encode_chunk(chunk).map(Frame::Binary),
        other => encode_text(other).map(Frame::Text),
    }
}

/// Encodes any message as JSON text (chunk payloads become base64).
///
/// Used for transports that cannot carry binary frames.
pub fn encode_text(msg: &TransferMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a frame received from the connection.
pub fn decode(frame: &Frame) -> Result<TransferMessage, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }
    match frame {
        Frame::Text(text) => Ok(serde_json::from_str(text)?),
        Frame::Binary(data) => decode_chunk(data).map(TransferMessage::Chunk),
    }
}

fn encode_chunk(chunk: &ChunkMessage) -> Result<Vec<u8>, CodecError> {
    let header = ChunkHeader {
        msg_type: MessageKind::Chunk.as_str().to_string(),
        file_name: chunk.file_name.clone(),
        seq: chunk.seq,
    };
    let header_json = serde_json::to_vec(&header)?;
    if header_json.len() > MAX_HEADER_SIZE {
        return Err(CodecError::HeaderTooLarge(header_json.len()));
    }
    let total = 4 + header_json.len() + chunk.payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(total));
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(&chunk.payload);
    Ok(buf)
}

fn decode_chunk(data: &[u8]) -> Result<ChunkMessage, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if header_len > MAX_HEADER_SIZE {
        return Err(CodecError::HeaderTooLarge(header_len));
    }
    if data.len() < 4 + header_len {
        return Err(CodecError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header: ChunkHeader = serde_json::from_slice(&data[4..4 + header_len])?;
    if header.msg_type != MessageKind::Chunk.as_str() {
        return Err(CodecError::UnexpectedKind(header.msg_type));
    }

    Ok(ChunkMessage {
        file_name: header.file_name,
        seq: header.seq,
        payload: data[4 + header_len..].to_vec(),
    })
}
