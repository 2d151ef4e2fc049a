//! WebSocket read pump: turns incoming messages into channel events.

use futures_util::StreamExt;
use peerdrop_protocol::Frame;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::ChannelEvent;

/// Reads messages from the WebSocket and forwards frames as events.
///
/// Pings are answered through `control`. On exit the connection is
/// cancelled and [`ChannelEvent::Closed`] is delivered.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events: mpsc::Sender<ChannelEvent>,
    control: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        let frame = match msg {
            Some(Ok(tungstenite::Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
            Some(Ok(tungstenite::Message::Binary(data))) => Frame::Binary(data.to_vec()),
            Some(Ok(tungstenite::Message::Ping(data))) => {
                trace!("received ping, sending pong");
                let _ = control.send(tungstenite::Message::Pong(data)).await;
                continue;
            }
            Some(Ok(tungstenite::Message::Pong(_))) => {
                trace!("received pong");
                continue;
            }
            Some(Ok(tungstenite::Message::Close(frame))) => {
                debug!(?frame, "received close frame");
                break;
            }
            Some(Ok(tungstenite::Message::Frame(_))) => continue,
            Some(Err(e)) => {
                warn!("WebSocket read error: {e}");
                let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                debug!("WebSocket stream ended");
                break;
            }
        };

        if events.send(ChannelEvent::Frame(frame)).await.is_err() {
            debug!("event receiver dropped");
            break;
        }
    }

    cancel.cancel();
    let _ = events.send(ChannelEvent::Closed).await;
}
