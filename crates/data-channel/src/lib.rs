//! Connection adapters for peerdrop.
//!
//! A [`Connection`] is an ordered, reliable, message-oriented channel to a
//! single peer. The transfer layer only ever sees this contract; how the
//! bytes move is up to the adapter:
//!
//! - [`memory::pipe`] connects two endpoints inside one process.
//! - [`ws`] carries frames over a WebSocket.

pub mod connection;
pub mod error;
pub mod memory;
mod pumps;
pub mod ws;

pub use connection::{ChannelEvent, ConnectFuture, Connection, Connector, FrameSender};
pub use error::ChannelError;
pub use ws::{WsConnector, WsListener};
