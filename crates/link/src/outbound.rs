//! Outbound transfers: one task per file, sending chunks in order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use peerdrop_data_channel::FrameSender;
use peerdrop_protocol::{AbortSide, TransferMessage};
use peerdrop_transfer::{
    FileSource, Role, SendSession, SessionState, TransferDescriptor, TransferError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::TransferConfig;
use crate::events::{Completion, TransferEvent, TransferSummary};
use crate::peer::{EVENT_BUFFER, Shared, deliver, send_message, send_urgent_message};

/// Messages from the inbound task to the active outbound transfer.
#[derive(Debug)]
pub(crate) enum OutboundSignal {
    Ack(u64),
    PeerAborted(String),
    Disconnected,
}

/// How the inbound task reaches the active outbound transfer.
pub(crate) struct OutboundRoute {
    pub(crate) id: u64,
    pub(crate) signals: mpsc::UnboundedSender<OutboundSignal>,
}

/// Caller handle for one outbound transfer.
///
/// Dropping the handle does not stop the transfer; use [`cancel`](Self::cancel).
pub struct OutboundTransfer {
    descriptor: TransferDescriptor,
    events: mpsc::Receiver<TransferEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<TransferSummary, TransferError>>,
}

impl OutboundTransfer {
    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    /// Waits for the next event of this transfer. Returns `None` after the
    /// terminal event.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Abandons the transfer. The peer is told with an `abort`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the transfer to end.
    pub async fn finish(self) -> Result<TransferSummary, TransferError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::TransportUnavailable(format!(
                "send task ended unexpectedly: {e}"
            ))),
        }
    }
}

pub(crate) fn spawn(
    id: u64,
    sender: FrameSender,
    source: FileSource,
    config: &TransferConfig,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedReceiver<OutboundSignal>,
) -> OutboundTransfer {
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let descriptor = source.descriptor();
    let checksum = source.checksum().map(String::from);

    let task = SendTask {
        id,
        sender,
        shared,
        signals,
        events: events_tx,
        cancel: cancel.clone(),
        chunk_size: config.chunk_size,
        credits: Credits::new(config.window),
        stall_timeout: config.stall_timeout(),
        session: SendSession::new(descriptor.clone(), checksum, config.window),
    };

    OutboundTransfer {
        descriptor,
        events: events_rx,
        cancel,
        task: tokio::spawn(task.run(source)),
    }
}

struct SendTask {
    id: u64,
    sender: FrameSender,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedReceiver<OutboundSignal>,
    events: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
    chunk_size: usize,
    credits: Credits,
    stall_timeout: Option<Duration>,
    session: SendSession,
}

impl SendTask {
    async fn run(mut self, source: FileSource) -> Result<TransferSummary, TransferError> {
        let started = Instant::now();
        let result = self.transfer(source, started).await.map_err(|error| match error {
            // The connection went away after the transfer had begun.
            TransferError::TransportUnavailable(_)
                if self.session.state() == SessionState::Active =>
            {
                self.incomplete()
            }
            other => other,
        });
        self.shared.clear_outbound(self.id);

        match &result {
            Ok(summary) => {
                self.emit(TransferEvent::Completed(Completion::Sent(summary.clone())))
                    .await;
            }
            Err(error) => {
                self.session.fail(error);
                if tells_peer(error) && self.sender.is_open() {
                    let abort = TransferMessage::abort(AbortSide::Sender, error.to_string());
                    if let Err(e) = send_urgent_message(&self.sender, &abort) {
                        debug!("failed to send abort: {e}");
                    }
                }
                self.emit(TransferEvent::Failed {
                    role: Role::Sender,
                    descriptor: self.session.descriptor().clone(),
                    error: error.clone(),
                })
                .await;
            }
        }
        result
    }

    async fn transfer(
        &mut self,
        source: FileSource,
        started: Instant,
    ) -> Result<TransferSummary, TransferError> {
        let descriptor = self.session.descriptor().clone();
        let start = self.session.begin()?;
        send_message(&self.sender, &start).await?;
        self.emit(TransferEvent::Started {
            role: Role::Sender,
            descriptor: descriptor.clone(),
        })
        .await;

        let mut chunker = source.into_chunker(self.chunk_size);
        let mut chunks = 0;
        while self.session.state() == SessionState::Active {
            self.poll_signals()?;
            self.wait_for_credit().await?;

            let Some(chunk) = chunker.next_chunk()? else {
                return Err(TransferError::IncompleteTransfer {
                    received: self.session.bytes_sent(),
                    expected: descriptor.total_size,
                });
            };
            let (seq, offset, len) = (chunk.seq, chunk.offset, chunk.len());
            let msg = TransferMessage::chunk(descriptor.file_name.clone(), seq, chunk.data);
            send_message(&self.sender, &msg).await?;
            self.credits.on_sent();

            let progress = self.session.record_chunk(offset, len)?;
            send_message(&self.sender, &TransferMessage::progress(progress.percent)).await?;
            chunks += 1;
            trace!(seq, percent = progress.percent, "chunk queued");
            self.emit(TransferEvent::Progress(progress)).await;

            // Let other tasks on this runtime run between chunks.
            tokio::task::yield_now().await;
        }

        Ok(TransferSummary {
            file_name: descriptor.file_name,
            total_size: descriptor.total_size,
            chunks,
            elapsed: started.elapsed(),
        })
    }

    /// Applies signals that arrived since the last chunk.
    fn poll_signals(&mut self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        while let Ok(signal) = self.signals.try_recv() {
            self.apply(signal)?;
        }
        Ok(())
    }

    /// Blocks until the peer has room for another chunk.
    async fn wait_for_credit(&mut self) -> Result<(), TransferError> {
        while !self.credits.has_room() {
            let signal = match self.stall_timeout {
                Some(limit) => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                    res = tokio::time::timeout(limit, self.signals.recv()) => match res {
                        Ok(signal) => signal,
                        Err(_) => return Err(TransferError::Stalled),
                    },
                },
                None => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                    signal = self.signals.recv() => signal,
                },
            };
            match signal {
                Some(signal) => self.apply(signal)?,
                None => return Err(TransferError::TransportUnavailable("link closed".into())),
            }
        }
        Ok(())
    }

    fn apply(&mut self, signal: OutboundSignal) -> Result<(), TransferError> {
        match signal {
            OutboundSignal::Ack(seq) => {
                if self.credits.on_ack(seq) {
                    trace!(seq, "ack received");
                } else {
                    trace!(seq, "ignoring ack for a chunk not in flight");
                }
                Ok(())
            }
            OutboundSignal::PeerAborted(reason) => Err(TransferError::Aborted(reason)),
            OutboundSignal::Disconnected => Err(self.incomplete()),
        }
    }

    fn incomplete(&self) -> TransferError {
        TransferError::IncompleteTransfer {
            received: self.session.bytes_sent(),
            expected: self.session.descriptor().total_size,
        }
    }

    async fn emit(&self, event: TransferEvent) {
        if let Some(observer) = self.shared.observer() {
            observer.on_event(&event);
        }
        deliver(&self.events, event).await;
    }
}

/// Send window accounting. Acks are cumulative: `ack(n)` confirms every
/// chunk up to and including `n`. Acks for chunks that were never sent or
/// were already confirmed grant nothing.
#[derive(Debug)]
struct Credits {
    window: u32,
    available: u32,
    sent: u64,
    acked: u64,
}

impl Credits {
    fn new(window: u32) -> Self {
        Self {
            window,
            available: window,
            sent: 0,
            acked: 0,
        }
    }

    /// A window of zero never blocks.
    fn has_room(&self) -> bool {
        self.window == 0 || self.available > 0
    }

    fn on_sent(&mut self) {
        self.sent += 1;
        if self.window > 0 {
            self.available = self.available.saturating_sub(1);
        }
    }

    /// Returns false when the ack was stale or out of range.
    fn on_ack(&mut self, seq: u64) -> bool {
        if seq < self.acked || seq >= self.sent {
            return false;
        }
        let freed = seq + 1 - self.acked;
        self.acked = seq + 1;
        if self.window > 0 {
            let available = u64::from(self.available) + freed;
            self.available = available.min(u64::from(self.window)) as u32;
        }
        true
    }
}

/// Whether a local failure should be reported to the receiver.
fn tells_peer(error: &TransferError) -> bool {
    !matches!(
        error,
        TransferError::Aborted(_)
            | TransferError::IncompleteTransfer { .. }
            | TransferError::TransportUnavailable(_)
    )
}
