//! The per-connection link handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use peerdrop_data_channel::{Connection, FrameSender};
use peerdrop_protocol::{TransferMessage, encode};
use peerdrop_transfer::{FileSource, TransferError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::TransferConfig;
use crate::events::{Completion, TransferEvent, TransferObserver};
use crate::inbound::{self, InboundSink, InboundTransfers};
use crate::outbound::{self, OutboundRoute, OutboundSignal, OutboundTransfer};

/// Capacity of each caller-facing event channel.
pub(crate) const EVENT_BUFFER: usize = 256;

/// A transfer endpoint bound to one open connection.
///
/// The link runs one task that handles every inbound message for the
/// connection, in arrival order. Outbound transfers run on their own task
/// and share the connection's sending half. At most one outbound and one
/// inbound transfer are active at a time, and the two never share state.
pub struct PeerLink {
    peer: String,
    sender: FrameSender,
    config: TransferConfig,
    shared: Arc<Shared>,
    actor: JoinHandle<()>,
}

impl PeerLink {
    /// Takes ownership of `connection` and starts handling its messages.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(connection: Connection, config: TransferConfig) -> Self {
        let config = config.normalized();
        let peer = connection.peer().to_string();
        let (sender, events) = connection.into_parts();
        let shared = Arc::new(Shared::default());

        let actor = tokio::spawn(inbound::run(
            events,
            sender.clone(),
            Arc::clone(&shared),
            config.clone(),
            peer.clone(),
        ));
        info!(%peer, chunk_size = config.chunk_size, window = config.window, "peer link started");

        Self {
            peer,
            sender,
            config,
            shared,
            actor,
        }
    }

    /// Label of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Returns `true` while the underlying connection is open.
    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Installs an observer for every transfer on this link, replacing any
    /// previous one.
    pub fn set_observer(&self, observer: Arc<dyn TransferObserver>) {
        self.shared.lock().observer = Some(observer);
    }

    /// Starts receiving the events of inbound transfers.
    ///
    /// Only the first call returns a handle; later calls return `None`.
    /// Without a handle inbound transfers still run and are reported to the
    /// observer, but finished files are not kept.
    pub fn register_receive_handler(&self) -> Option<InboundTransfers> {
        let mut state = self.shared.lock();
        if state.receive_registered {
            return None;
        }
        state.receive_registered = true;

        let (sink, handle) = inbound::channel(EVENT_BUFFER);
        state.inbound = Some(sink);
        Some(handle)
    }

    /// Starts sending `source` to the peer.
    ///
    /// Fails with [`TransferError::TransportUnavailable`] when the
    /// connection is closed and with [`TransferError::TransferInProgress`]
    /// while another outbound transfer is active on this link.
    pub fn start_sending_file(&self, source: FileSource) -> Result<OutboundTransfer, TransferError> {
        if !self.sender.is_open() {
            return Err(TransferError::TransportUnavailable(
                "connection is closed".into(),
            ));
        }

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.shared.lock();
            if state.outbound.is_some() {
                return Err(TransferError::TransferInProgress);
            }
            state.next_outbound_id += 1;
            let id = state.next_outbound_id;
            state.outbound = Some(OutboundRoute {
                id,
                signals: signals_tx,
            });
            id
        };

        Ok(outbound::spawn(
            id,
            self.sender.clone(),
            source,
            &self.config,
            Arc::clone(&self.shared),
            signals_rx,
        ))
    }

    /// Closes the connection. Active transfers on both ends fail.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Waits until the connection has closed and every inbound transfer
    /// has been wound down.
    pub async fn closed(self) {
        let _ = self.actor.await;
    }
}

/// State shared between the link handle, the inbound task and the
/// outbound task.
#[derive(Default)]
pub(crate) struct Shared {
    state: Mutex<SharedState>,
}

#[derive(Default)]
pub(crate) struct SharedState {
    pub(crate) observer: Option<Arc<dyn TransferObserver>>,
    pub(crate) outbound: Option<OutboundRoute>,
    pub(crate) inbound: Option<InboundSink>,
    pub(crate) receive_registered: bool,
    pub(crate) next_outbound_id: u64,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn TransferObserver>> {
        self.lock().observer.clone()
    }

    /// Forwards a signal to the active outbound transfer. Returns `false`
    /// when there is none.
    pub(crate) fn signal_outbound(&self, signal: OutboundSignal) -> bool {
        match self.lock().outbound.as_ref() {
            Some(route) => route.signals.send(signal).is_ok(),
            None => false,
        }
    }

    /// Drops the route of outbound transfer `id` if it is still current.
    pub(crate) fn clear_outbound(&self, id: u64) {
        let mut state = self.lock();
        if state.outbound.as_ref().is_some_and(|route| route.id == id) {
            state.outbound = None;
        }
    }

    /// Drops the receive handler's sending half so its stream ends once
    /// drained.
    pub(crate) fn detach_inbound(&self) {
        self.lock().inbound = None;
    }

    /// Reports an inbound event to the observer and the receive handler.
    pub(crate) async fn emit_inbound(&self, event: TransferEvent) {
        let (observer, sink) = {
            let state = self.lock();
            (state.observer.clone(), state.inbound.clone())
        };

        if let Some(observer) = observer {
            observer.on_event(&event);
        }
        let Some(sink) = sink else {
            return;
        };
        if let TransferEvent::Completed(Completion::Received(file)) = &event {
            sink.store(file.clone());
        }
        deliver(&sink.events, event).await;
    }
}

/// Encodes and sends one protocol message.
pub(crate) async fn send_message(
    sender: &FrameSender,
    msg: &TransferMessage,
) -> Result<(), TransferError> {
    let frame = encode(msg).map_err(|e| TransferError::ProtocolViolation(e.to_string()))?;
    sender
        .send(frame)
        .await
        .map_err(|e| TransferError::TransportUnavailable(e.to_string()))
}

/// Queues `msg` ahead of regular frames without waiting for room. Used
/// for acks and aborts, which must not wait behind our own chunks.
pub(crate) fn send_urgent_message(
    sender: &FrameSender,
    msg: &TransferMessage,
) -> Result<(), TransferError> {
    let frame = encode(msg).map_err(|e| TransferError::ProtocolViolation(e.to_string()))?;
    sender
        .send_urgent(frame)
        .map_err(|e| TransferError::TransportUnavailable(e.to_string()))
}

/// Pushes an event to a caller channel. Progress is dropped rather than
/// waited on when the caller falls behind.
pub(crate) async fn deliver(tx: &mpsc::Sender<TransferEvent>, event: TransferEvent) {
    if event.is_lossy() {
        let _ = tx.try_send(event);
    } else {
        let _ = tx.send(event).await;
    }
}
