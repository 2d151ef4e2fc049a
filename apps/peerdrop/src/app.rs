//! The `listen` and `send` commands.

use std::path::Path;

use anyhow::Context;
use peerdrop_data_channel::{Connection, Connector, WsConnector, WsListener};
use peerdrop_link::{
    Completion, FileSource, PeerLink, TransferConfig, TransferEvent, TransferSummary,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Accepts peers on `bind` and saves what they send into `out_dir`.
pub async fn listen(
    bind: &str,
    out_dir: &Path,
    config: TransferConfig,
    once: bool,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let listener = WsListener::bind(bind).await?;
    println!("listening on ws://{}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            on_signal.cancel();
        }
    });

    serve(listener, out_dir, config, once, shutdown).await
}

/// Handles peers one at a time until `shutdown` fires. With `once`,
/// returns after the first peer disconnects.
async fn serve(
    listener: WsListener,
    out_dir: &Path,
    config: TransferConfig,
    once: bool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let connection = tokio::select! {
            res = listener.accept() => match res {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("failed to accept peer: {e}");
                    continue;
                }
            },
            _ = shutdown.cancelled() => return Ok(()),
        };

        let peer = connection.peer().to_string();
        let saved = receive_from(connection, out_dir, config.clone(), &shutdown).await?;
        info!(%peer, saved, "peer disconnected");
        if once || shutdown.is_cancelled() {
            return Ok(());
        }
    }
}

/// Receives files from one peer until it disconnects or `shutdown`
/// fires. Returns how many were saved.
async fn receive_from(
    connection: Connection,
    out_dir: &Path,
    config: TransferConfig,
    shutdown: &CancellationToken,
) -> anyhow::Result<usize> {
    let link = PeerLink::spawn(connection, config);
    let Some(mut inbound) = link.register_receive_handler() else {
        anyhow::bail!("receive handler already registered");
    };

    let mut saved = 0;
    let mut closing = false;
    loop {
        let event = tokio::select! {
            event = inbound.next_event() => event,
            _ = shutdown.cancelled(), if !closing => {
                info!(peer = link.peer(), "closing link");
                link.close();
                closing = true;
                continue;
            }
        };
        // The stream ends once the link is down and drained.
        let Some(event) = event else { break };
        match event {
            TransferEvent::Started { descriptor, .. } => {
                info!(
                    file_name = %descriptor.file_name,
                    total_size = descriptor.total_size,
                    "receiving file"
                );
            }
            TransferEvent::Superseded { previous, received } => {
                warn!(file_name = %previous.file_name, received, "transfer replaced by a new one");
            }
            TransferEvent::Completed(Completion::Received(_)) => {
                while let Some(file) = inbound.take_received() {
                    match file.save_into(out_dir) {
                        Ok(path) => {
                            println!("received {} ({} bytes)", path.display(), file.len());
                            saved += 1;
                        }
                        Err(e) => warn!(file_name = file.file_name(), "file not saved: {e}"),
                    }
                }
            }
            TransferEvent::Failed {
                descriptor, error, ..
            } => {
                eprintln!("receiving {} failed: {error}", descriptor.file_name);
            }
            _ => {}
        }
    }

    link.closed().await;
    Ok(saved)
}

/// Sends `path` to the peer at `url` and waits for the transfer to end.
pub async fn send(
    url: &str,
    path: &Path,
    config: TransferConfig,
) -> anyhow::Result<TransferSummary> {
    let source = FileSource::open(path).with_context(|| format!("opening {}", path.display()))?;
    let connection = WsConnector::default().connect(url).await?;
    let link = PeerLink::spawn(connection, config);

    let mut transfer = link.start_sending_file(source)?;
    let name = transfer.descriptor().file_name.clone();
    while let Some(event) = transfer.next_event().await {
        if let TransferEvent::Progress(progress) = &event {
            let mib_per_sec = progress.bytes_per_second / (1024.0 * 1024.0);
            eprint!("\r{name}: {:>3}% {mib_per_sec:.1} MiB/s", progress.percent);
        }
        if event.is_terminal() {
            eprintln!();
            break;
        }
    }

    let result = transfer.finish().await;
    link.close();
    link.closed().await;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_listener_saves_file() {
        let inbox = tempfile::tempdir().unwrap();
        let outbox = tempfile::tempdir().unwrap();
        let path = outbox.path().join("photo.jpg");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let out_dir = inbox.path().to_path_buf();
        let server = tokio::spawn(async move {
            let shutdown = CancellationToken::new();
            serve(listener, &out_dir, TransferConfig::default(), true, shutdown).await
        });

        let summary = send(&url, &path, TransferConfig::default()).await.unwrap();
        assert_eq!(summary.file_name, "photo.jpg");
        assert_eq!(summary.total_size, 200_000);

        server.await.unwrap().unwrap();
        assert_eq!(std::fs::read(inbox.path().join("photo.jpg")).unwrap(), data);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_connected_peer() {
        use peerdrop_data_channel::ChannelEvent;
        use peerdrop_protocol::{TransferMessage, decode, encode};

        let inbox = tempfile::tempdir().unwrap();
        let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let out_dir = inbox.path().to_path_buf();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            serve(listener, &out_dir, TransferConfig::default(), false, token).await
        });

        // A peer that starts a transfer and then goes quiet.
        let mut peer = WsConnector::default().connect(&url).await.unwrap();
        let start = TransferMessage::start("big.bin", 100, None, 1);
        peer.sender().send(encode(&start).unwrap()).await.unwrap();
        let chunk = TransferMessage::chunk("big.bin", 0, vec![7; 10]);
        peer.sender().send(encode(&chunk).unwrap()).await.unwrap();

        // The ack proves the listener is inside the transfer.
        let wait = std::time::Duration::from_secs(10);
        loop {
            match tokio::time::timeout(wait, peer.recv()).await.unwrap() {
                Some(ChannelEvent::Frame(frame)) => {
                    if matches!(decode(&frame).unwrap(), TransferMessage::Ack(_)) {
                        break;
                    }
                }
                Some(ChannelEvent::Error(_)) => {}
                Some(ChannelEvent::Closed) | None => panic!("listener dropped the peer"),
            }
        }

        shutdown.cancel();
        tokio::time::timeout(wait, server)
            .await
            .expect("listener ignored shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_dir(inbox.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn send_missing_file_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let err = send(
            "ws://127.0.0.1:9",
            &dir.path().join("absent.bin"),
            TransferConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("absent.bin"));
    }
}
