//! Caller-facing API for peerdrop transfers.
//!
//! Wrap an open [`Connection`](peerdrop_data_channel::Connection) in a
//! [`PeerLink`], then send files with
//! [`start_sending_file`](PeerLink::start_sending_file) and pick up
//! incoming ones through
//! [`register_receive_handler`](PeerLink::register_receive_handler).

pub mod config;
pub mod events;
mod inbound;
mod outbound;
mod peer;

pub use config::{ConfigError, TransferConfig};
pub use events::{
    CallbackObserver, Completion, EventCallback, TransferEvent, TransferObserver, TransferSummary,
};
pub use inbound::InboundTransfers;
pub use outbound::OutboundTransfer;
pub use peer::PeerLink;

pub use peerdrop_transfer::{FileSource, ReceivedFile, Role, TransferError, TransferProgress};
