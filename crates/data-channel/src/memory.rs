//! Lossless in-process connection, used for tests and embedding.

use peerdrop_protocol::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::connection::{ChannelEvent, Connection, FRAME_BUFFER, FrameSender};

/// Creates two connected endpoints.
///
/// Closing either side, or dropping all of one side's senders, closes the
/// pipe and delivers [`ChannelEvent::Closed`] to both ends. Must be called
/// from within a tokio runtime.
pub fn pipe() -> (Connection, Connection) {
    pipe_with_capacity(FRAME_BUFFER)
}

/// Like [`pipe`] with an explicit per-direction buffer.
pub fn pipe_with_capacity(capacity: usize) -> (Connection, Connection) {
    let closed = CancellationToken::new();

    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    let (a_urgent_tx, a_urgent_rx) = mpsc::unbounded_channel();
    let (b_urgent_tx, b_urgent_rx) = mpsc::unbounded_channel();
    let (a_events_tx, a_events_rx) = mpsc::channel(capacity);
    let (b_events_tx, b_events_rx) = mpsc::channel(capacity);

    tokio::spawn(forward(a_rx, a_urgent_rx, b_events_tx, closed.clone()));
    tokio::spawn(forward(b_rx, b_urgent_rx, a_events_tx, closed.clone()));

    let a_sender = FrameSender::new(a_tx, a_urgent_tx, closed.clone());
    let b_sender = FrameSender::new(b_tx, b_urgent_tx, closed);
    let a = Connection::new("memory:b", a_sender, a_events_rx);
    let b = Connection::new("memory:a", b_sender, b_events_rx);
    (a, b)
}

/// Moves frames from one side's outbox to the other side's event stream.
/// Urgent frames go first.
async fn forward(
    mut outbox: mpsc::Receiver<Frame>,
    mut urgent: mpsc::UnboundedReceiver<Frame>,
    inbox: mpsc::Sender<ChannelEvent>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = urgent.recv() => frame,
            frame = outbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closed.cancelled() => break,
        };

        trace!(len = frame.len(), "pipe frame");
        if inbox.send(ChannelEvent::Frame(frame)).await.is_err() {
            break;
        }
    }

    closed.cancel();
    let _ = inbox.send(ChannelEvent::Closed).await;
}
