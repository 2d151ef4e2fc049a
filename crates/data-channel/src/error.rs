//! Error types for connection adapters.

use tokio_tungstenite::tungstenite;

/// Errors produced by a connection adapter.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to connect to {remote}: {reason}")]
    ConnectFailed { remote: String, reason: String },

    #[error("channel is not open")]
    NotOpen,

    #[error("connection timed out")]
    Timeout,
}
