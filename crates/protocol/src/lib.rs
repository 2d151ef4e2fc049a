//! Wire protocol for peerdrop chunked file transfers.
//!
//! Defines the message kinds exchanged between two peers and the codec
//! that maps them onto text and binary connection frames.

pub mod codec;
pub mod constants;
pub mod messages;

// Re-export primary types for convenience.
pub use codec::{CodecError, Frame, decode, encode, encode_text};
pub use constants::MessageKind;
pub use messages::{
    AbortMessage, AbortSide, AckMessage, ChunkMessage, ProgressMessage, StartMessage,
    TransferMessage,
};
