use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::MessageKind;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Announces a new outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessage {
    pub file_name: String,
    pub total_size: u64,
    /// Hex SHA-256 of the whole file, when the sender knows it up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Credit window requested by the sender (0 = no acknowledgements).
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub window: u32,
}

/// One ordered slice of file content.
///
/// The `payload` field is base64-encoded when the message travels as JSON text;
/// binary frames carry it raw (see [`crate::codec`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMessage {
    pub file_name: String,
    /// 0-based sequence number within the transfer. Absent from legacy
    /// senders, which rely on arrival order alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Advisory sender-side completion percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Nominally 0..=100; receivers clamp whatever arrives.
    #[serde(deserialize_with = "saturating_percent")]
    pub percent: i32,
}

/// Which end of a transfer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortSide {
    /// The sending end abandoned its outbound transfer.
    Sender,
    /// The receiving end abandoned its inbound transfer.
    Receiver,
}

/// Explicit cancellation of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMessage {
    pub side: AbortSide,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Returns one credit to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A protocol message exchanged over a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferMessage {
    #[serde(rename = "file-start")]
    Start(StartMessage),
    #[serde(rename = "file-chunk")]
    Chunk(ChunkMessage),
    #[serde(rename = "progress")]
    Progress(ProgressMessage),
    #[serde(rename = "abort")]
    Abort(AbortMessage),
    #[serde(rename = "chunk-ack")]
    Ack(AckMessage),
}

impl TransferMessage {
    /// Builds a `file-start` message.
    pub fn start(
        file_name: impl Into<String>,
        total_size: u64,
        checksum: Option<String>,
        window: u32,
    ) -> Self {
        TransferMessage::Start(StartMessage {
            file_name: file_name.into(),
            total_size,
            checksum,
            window,
        })
    }

    /// Builds a `file-chunk` message.
    pub fn chunk(file_name: impl Into<String>, seq: u64, payload: Vec<u8>) -> Self {
        TransferMessage::Chunk(ChunkMessage {
            file_name: file_name.into(),
            seq: Some(seq),
            payload,
        })
    }

    /// Builds a `progress` message.
    pub fn progress(percent: u8) -> Self {
        TransferMessage::Progress(ProgressMessage {
            percent: i32::from(percent),
        })
    }

    /// Builds an `abort` message.
    pub fn abort(side: AbortSide, reason: impl Into<String>) -> Self {
        TransferMessage::Abort(AbortMessage {
            side,
            reason: reason.into(),
        })
    }

    /// Builds a `chunk-ack` message.
    pub fn ack(seq: u64) -> Self {
        TransferMessage::Ack(AckMessage { seq })
    }

    /// Returns the kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            TransferMessage::Start(_) => MessageKind::Start,
            TransferMessage::Chunk(_) => MessageKind::Chunk,
            TransferMessage::Progress(_) => MessageKind::Progress,
            TransferMessage::Abort(_) => MessageKind::Abort,
            TransferMessage::Ack(_) => MessageKind::Ack,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Accepts any JSON number. Fractions truncate and out-of-range values
/// saturate to the `i32` bounds.
fn saturating_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(f64::deserialize(deserializer)? as i32)
}

/// Serializes `Vec<u8>` as a base64 string in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
