//! The connection contract shared by every adapter.

use std::future::Future;
use std::pin::Pin;

use peerdrop_protocol::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

/// Outbound frames buffered per connection before `send` waits.
pub const FRAME_BUFFER: usize = 64;

/// Something that happened on the receiving half of a connection.
///
/// `Closed` is always the last event delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(Frame),
    Error(String),
    Closed,
}

/// Cloneable sending half of a [`Connection`].
///
/// Regular frames go through a bounded queue and [`send`](Self::send) waits
/// for room. Urgent frames go through an unbounded lane that the adapter
/// drains first, so a reply never waits behind bulk data.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
    urgent: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
}

impl FrameSender {
    pub(crate) fn new(
        tx: mpsc::Sender<Frame>,
        urgent: mpsc::UnboundedSender<Frame>,
        closed: CancellationToken,
    ) -> Self {
        Self { tx, urgent, closed }
    }

    /// Queues a frame. Frames are delivered in the order they were sent.
    ///
    /// Fails with [`ChannelError::NotOpen`] once the connection is closed.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::NotOpen);
        }
        self.tx.send(frame).await.map_err(|_| ChannelError::NotOpen)
    }

    /// Queues a small frame ahead of regular traffic without waiting.
    ///
    /// Urgent frames keep their order among themselves but may overtake
    /// frames queued with [`send`](Self::send).
    pub fn send_urgent(&self, frame: Frame) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::NotOpen);
        }
        self.urgent.send(frame).map_err(|_| ChannelError::NotOpen)
    }

    /// Returns `true` until either side closes the connection.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Closes the connection. Frames already queued are still flushed.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// An open, ordered, reliable message channel to exactly one peer.
#[derive(Debug)]
pub struct Connection {
    peer: String,
    sender: FrameSender,
    events: mpsc::Receiver<ChannelEvent>,
}

impl Connection {
    pub(crate) fn new(
        peer: impl Into<String>,
        sender: FrameSender,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Self {
        Self {
            peer: peer.into(),
            sender,
            events,
        }
    }

    /// Human-readable label of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Waits for the next event. Returns `None` after `Closed` was consumed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Splits into the sending half and the event stream.
    pub fn into_parts(self) -> (FrameSender, mpsc::Receiver<ChannelEvent>) {
        (self.sender, self.events)
    }
}

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Connection, ChannelError>> + Send + 'a>>;

/// Opens connections to remote peers.
pub trait Connector: Send + Sync {
    /// Connects to `remote`.
    ///
    /// Fails with [`ChannelError::ConnectFailed`] when the remote is
    /// unreachable or rejects the connection.
    fn connect<'a>(&'a self, remote: &'a str) -> ConnectFuture<'a>;
}
