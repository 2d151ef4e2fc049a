//! WebSocket write pump: serialises outbound frames.

use futures_util::SinkExt;
use peerdrop_protocol::Frame;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

fn to_message(frame: Frame) -> tungstenite::Message {
    match frame {
        Frame::Text(text) => tungstenite::Message::Text(text.into()),
        Frame::Binary(data) => tungstenite::Message::Binary(data.into()),
    }
}

/// Writes frames and control replies to the WebSocket.
///
/// Control messages (pongs) go first, then urgent frames, then regular
/// ones. Queued frames are flushed before a close is honoured. Sends a
/// close frame and cancels the connection on exit.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut frames: mpsc::Receiver<Frame>,
    mut urgent: mpsc::UnboundedReceiver<Frame>,
    mut control: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = control.recv() => msg,
            Some(frame) = urgent.recv() => to_message(frame),
            frame = frames.recv() => match frame {
                Some(frame) => to_message(frame),
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if let Err(e) = write.send(msg).await {
            error!("WebSocket write error: {e}");
            break;
        }
    }

    debug!("write pump stopping");
    cancel.cancel();
    let _ = write.send(tungstenite::Message::Close(None)).await;
}
