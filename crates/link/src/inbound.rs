//! Inbound message handling: the single task that owns a link's receive
//! session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use peerdrop_data_channel::{ChannelEvent, FrameSender};
use peerdrop_protocol::{AbortSide, Frame, TransferMessage, decode};
use peerdrop_transfer::{ReceiveOutcome, ReceiveSession, ReceivedFile, Role, TransferError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::TransferConfig;
use crate::events::{Completion, TransferEvent};
use crate::outbound::OutboundSignal;
use crate::peer::{Shared, send_urgent_message};

/// Caller handle for inbound transfers on a link.
pub struct InboundTransfers {
    events: mpsc::Receiver<TransferEvent>,
    received: Arc<Mutex<VecDeque<ReceivedFile>>>,
}

impl InboundTransfers {
    /// Waits for the next inbound event. Returns `None` once the link has
    /// shut down and every event was consumed.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Takes the oldest finished file that has not been taken yet.
    pub fn take_received(&self) -> Option<ReceivedFile> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Link-side half of [`InboundTransfers`].
#[derive(Clone)]
pub(crate) struct InboundSink {
    pub(crate) events: mpsc::Sender<TransferEvent>,
    received: Arc<Mutex<VecDeque<ReceivedFile>>>,
}

impl InboundSink {
    pub(crate) fn store(&self, file: ReceivedFile) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(file);
    }
}

pub(crate) fn channel(capacity: usize) -> (InboundSink, InboundTransfers) {
    let (tx, rx) = mpsc::channel(capacity);
    let received = Arc::new(Mutex::new(VecDeque::new()));
    (
        InboundSink {
            events: tx,
            received: Arc::clone(&received),
        },
        InboundTransfers {
            events: rx,
            received,
        },
    )
}

struct InboundActor {
    peer: String,
    session: ReceiveSession,
    sender: FrameSender,
    shared: Arc<Shared>,
}

/// Handles every event of one connection until it closes.
pub(crate) async fn run(
    mut events: mpsc::Receiver<ChannelEvent>,
    sender: FrameSender,
    shared: Arc<Shared>,
    config: TransferConfig,
    peer: String,
) {
    let stall_timeout = config.stall_timeout();
    let mut actor = InboundActor {
        peer,
        session: ReceiveSession::new(config.verify_checksum),
        sender,
        shared,
    };

    let stall = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(stall);

    loop {
        tokio::select! {
            () = &mut stall, if stall_timeout.is_some() && actor.session.is_active() => {
                actor.on_stall().await;
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Frame(frame)) => {
                    let activity = actor.on_frame(frame).await;
                    if let (true, Some(limit)) = (activity, stall_timeout) {
                        stall.as_mut().reset(Instant::now() + limit);
                    }
                }
                Some(ChannelEvent::Error(e)) => {
                    warn!(peer = %actor.peer, "connection error: {e}");
                }
                Some(ChannelEvent::Closed) | None => break,
            }
        }
    }

    actor.on_disconnect().await;
    actor.shared.detach_inbound();
}

impl InboundActor {
    /// Handles one frame. Returns `true` when it moved an inbound transfer
    /// forward.
    async fn on_frame(&mut self, frame: Frame) -> bool {
        let msg = match decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = %self.peer, "dropping undecodable frame: {e}");
                let error = TransferError::ProtocolViolation(format!("undecodable frame: {e}"));
                self.shared.emit_inbound(TransferEvent::Violation(error)).await;
                return false;
            }
        };
        trace!(kind = %msg.kind(), "message received");

        match msg {
            TransferMessage::Start(start) => {
                let outcomes = self.session.on_start(start);
                self.dispatch(outcomes, false).await;
                true
            }
            TransferMessage::Chunk(chunk) => {
                let outcomes = self.session.on_chunk(chunk);
                self.dispatch(outcomes, true).await;
                true
            }
            TransferMessage::Progress(progress) => {
                let outcomes = self.session.on_progress(progress);
                self.dispatch(outcomes, false).await;
                false
            }
            TransferMessage::Abort(abort) => {
                match abort.side {
                    AbortSide::Sender => {
                        let outcomes = self.session.on_abort(abort);
                        if outcomes.is_empty() {
                            debug!("sender abort with no active inbound transfer");
                        }
                        self.dispatch(outcomes, false).await;
                    }
                    AbortSide::Receiver => {
                        if !self.shared.signal_outbound(OutboundSignal::PeerAborted(abort.reason)) {
                            debug!("receiver abort with no active outbound transfer");
                        }
                    }
                }
                false
            }
            TransferMessage::Ack(ack) => {
                if !self.shared.signal_outbound(OutboundSignal::Ack(ack.seq)) {
                    trace!(seq = ack.seq, "ack with no active outbound transfer");
                }
                false
            }
        }
    }

    async fn on_stall(&mut self) {
        let outcomes = self.session.on_stall();
        self.dispatch(outcomes, true).await;
    }

    async fn on_disconnect(&mut self) {
        let outcomes = self.session.on_disconnect();
        self.dispatch(outcomes, false).await;
        self.shared.signal_outbound(OutboundSignal::Disconnected);
        self.sender.close();
        info!(peer = %self.peer, "peer link closed");
    }

    /// Turns session outcomes into events. With `notify_peer`, a failure is
    /// also reported to the sender with an `abort`.
    async fn dispatch(&mut self, outcomes: Vec<ReceiveOutcome>, notify_peer: bool) {
        for outcome in outcomes {
            let event = match outcome {
                ReceiveOutcome::SendAck(seq) => {
                    if let Err(e) = send_urgent_message(&self.sender, &TransferMessage::ack(seq)) {
                        debug!(seq, "failed to send ack: {e}");
                    }
                    continue;
                }
                ReceiveOutcome::Started(descriptor) => TransferEvent::Started {
                    role: Role::Receiver,
                    descriptor,
                },
                ReceiveOutcome::Superseded { previous, received } => {
                    TransferEvent::Superseded { previous, received }
                }
                ReceiveOutcome::Progress(progress) => TransferEvent::Progress(progress),
                ReceiveOutcome::AdvisoryProgress(percent) => TransferEvent::AdvisoryProgress(percent),
                ReceiveOutcome::Completed(file) => TransferEvent::Completed(Completion::Received(file)),
                ReceiveOutcome::Failed { descriptor, error } => {
                    if notify_peer && self.sender.is_open() {
                        let abort = TransferMessage::abort(AbortSide::Receiver, error.to_string());
                        if let Err(e) = send_urgent_message(&self.sender, &abort) {
                            debug!("failed to send abort: {e}");
                        }
                    }
                    TransferEvent::Failed {
                        role: Role::Receiver,
                        descriptor,
                        error,
                    }
                }
                ReceiveOutcome::Violation(error) => TransferEvent::Violation(error),
            };
            self.shared.emit_inbound(event).await;
        }
    }
}
