//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use peerdrop_link::TransferConfig;

/// peerdrop - send a file straight to a peer
#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Wait for peers and save the files they send
    Listen(ListenArgs),

    /// Send one file to a listening peer
    Send(SendArgs),
}

#[derive(Args)]
pub struct ListenArgs {
    /// Address to listen on (e.g. 0.0.0.0:9420)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Directory to save received files into
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Exit after the first peer disconnects
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

#[derive(Args)]
pub struct SendArgs {
    /// Peer address (e.g. ws://192.168.1.20:9420)
    pub url: String,

    /// File to send
    pub file: PathBuf,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// Overrides for the `[transfer]` section of the config file.
#[derive(Args, Default)]
pub struct TransferArgs {
    /// Bytes per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Chunks in flight before an acknowledgement is needed (0 = off)
    #[arg(long)]
    pub window: Option<u32>,

    /// Seconds without progress before giving up (0 = never)
    #[arg(long)]
    pub stall_timeout: Option<u64>,

    /// Skip SHA-256 verification of received files
    #[arg(long)]
    pub no_verify: bool,
}

impl TransferArgs {
    /// Applies the overrides on top of `config`.
    pub fn apply(&self, mut config: TransferConfig) -> TransferConfig {
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(secs) = self.stall_timeout {
            config.stall_timeout_secs = secs;
        }
        if self.no_verify {
            config.verify_checksum = false;
        }
        config
    }
}
