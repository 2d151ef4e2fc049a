use std::time::Duration;

/// Protocol revision spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default chunk size (64 KiB).
///
/// Chunk size is not negotiated: receivers accept whatever size the sender
/// picks, so this is a sender-side tuning knob only.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunk size used by the earliest browser senders (16 KiB).
pub const LEGACY_CHUNK_SIZE: usize = 16 * 1024;

/// Largest chunk a sender may be configured to emit (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest frame accepted by the decoder: one maximum chunk plus header room.
pub const MAX_FRAME_SIZE: usize = MAX_CHUNK_SIZE + 64 * 1024;

/// Largest JSON header allowed in a binary chunk frame.
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Default number of unacknowledged chunks a sender keeps in flight.
pub const DEFAULT_WINDOW: u32 = 16;

/// Time an active receive session may go without a chunk before it is failed.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed to establish a peer connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message kind identifier, carried as the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Start,
    Chunk,
    Progress,
    Abort,
    Ack,
}

impl MessageKind {
    /// Wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Start => "file-start",
            MessageKind::Chunk => "file-chunk",
            MessageKind::Progress => "progress",
            MessageKind::Abort => "abort",
            MessageKind::Ack => "chunk-ack",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
