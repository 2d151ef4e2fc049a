//! Per-link transfer tuning.

use std::time::Duration;

use peerdrop_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_STALL_TIMEOUT, DEFAULT_WINDOW, MAX_CHUNK_SIZE,
};
use serde::{Deserialize, Serialize};

/// Errors from validating a [`TransferConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size {size} exceeds maximum of {max} bytes")]
    ChunkSizeTooLarge { size: usize, max: usize },

    #[error("window {0} is too large")]
    WindowTooLarge(u32),
}

/// Largest credit window accepted.
pub const MAX_WINDOW: u32 = 4096;

/// Transfer settings applied to every transfer on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per chunk for outbound transfers (0 = default).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks that may be in flight before an acknowledgement is needed
    /// (0 = no acknowledgements).
    #[serde(default = "default_window")]
    pub window: u32,

    /// Seconds without progress before a transfer is abandoned (0 = never).
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Verify the announced SHA-256 of inbound files.
    #[serde(default = "default_true")]
    pub verify_checksum: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_window() -> u32 {
    DEFAULT_WINDOW
}

fn default_stall_timeout_secs() -> u64 {
    DEFAULT_STALL_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            window: default_window(),
            stall_timeout_secs: default_stall_timeout_secs(),
            verify_checksum: default_true(),
        }
    }
}

impl TransferConfig {
    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSizeTooLarge {
                size: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.window > MAX_WINDOW {
            return Err(ConfigError::WindowTooLarge(self.window));
        }
        Ok(())
    }

    /// Returns a copy with out-of-range values pulled into range.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.chunk_size == 0 {
            config.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if config.chunk_size > MAX_CHUNK_SIZE {
            tracing::warn!(chunk_size = config.chunk_size, "chunk size clamped");
            config.chunk_size = MAX_CHUNK_SIZE;
        }
        config.window = config.window.min(MAX_WINDOW);
        config
    }

    /// Stall timeout, or `None` when disabled.
    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}
