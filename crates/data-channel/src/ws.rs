//! WebSocket connection adapter.
//!
//! One side listens with [`WsListener`], the other dials with
//! [`WsConnector`]. Both end up with the same [`Connection`]: text
//! messages map to [`Frame::Text`](peerdrop_protocol::Frame::Text) and
//! binary messages to [`Frame::Binary`](peerdrop_protocol::Frame::Binary).

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use peerdrop_protocol::constants::{CONNECT_TIMEOUT, MAX_FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{WebSocketStream, accept_async_with_config, connect_async_with_config};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connection::{
    ChannelEvent, ConnectFuture, Connection, Connector, FRAME_BUFFER, FrameSender,
};
use crate::error::ChannelError;
use crate::pumps::{read::read_pump, write::write_pump};

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);
    config
}

/// Starts the read and write pumps for an upgraded stream.
fn spawn_connection<S>(ws_stream: WebSocketStream<S>, peer: String) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();
    let cancel = CancellationToken::new();

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
    let (urgent_tx, urgent_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(FRAME_BUFFER);

    tokio::spawn(write_pump(write, frame_rx, urgent_rx, control_rx, cancel.clone()));
    tokio::spawn(read_pump(read, events_tx, control_tx, cancel.clone()));

    Connection::new(peer, FrameSender::new(frame_tx, urgent_tx, cancel), events_rx)
}

/// Dials `ws://` or `wss://` URLs.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn dial(&self, url: &str) -> Result<Connection, ChannelError> {
        let attempt = connect_async_with_config(url, Some(ws_config()), false);
        let (ws_stream, _) = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(ChannelError::ConnectFailed {
                    remote: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(ChannelError::Timeout),
        };

        info!(%url, "WebSocket connection established");
        Ok(spawn_connection(ws_stream, url.to_string()))
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    fn connect<'a>(&'a self, remote: &'a str) -> ConnectFuture<'a> {
        Box::pin(self.dial(remote))
    }
}

/// Accepts incoming WebSocket peers on a TCP port.
pub struct WsListener {
    listener: TcpListener,
}

impl WsListener {
    /// Binds the listening socket. Port 0 picks a free port.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next peer and completes the WebSocket upgrade.
    pub async fn accept(&self) -> Result<Connection, ChannelError> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let ws_stream = accept_async_with_config(stream, Some(ws_config())).await?;
        info!(%peer_addr, "WebSocket connection accepted");
        Ok(spawn_connection(ws_stream, peer_addr.to_string()))
    }
}
