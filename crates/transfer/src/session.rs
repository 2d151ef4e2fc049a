use peerdrop_protocol::{
    AbortMessage, AbortSide, ChunkMessage, ProgressMessage, StartMessage, TransferMessage,
};
use tracing::{debug, info, trace, warn};

use crate::progress::{SpeedCalculator, clamp_percent, percent};
use crate::reassembler::{ReceivedFile, Reassembler};
use crate::types::{Role, SessionState, TransferDescriptor, TransferProgress};
use crate::TransferError;

// ---------------------------------------------------------------------------
// Sender role
// ---------------------------------------------------------------------------

/// Sender-side state for one outbound transfer.
///
/// The session only does the accounting; the caller owns the chunker and
/// the connection and reports each chunk after it has been sent.
pub struct SendSession {
    descriptor: TransferDescriptor,
    checksum: Option<String>,
    window: u32,
    bytes_sent: u64,
    state: SessionState,
    speed: SpeedCalculator,
}

impl SendSession {
    pub fn new(descriptor: TransferDescriptor, checksum: Option<String>, window: u32) -> Self {
        Self {
            descriptor,
            checksum,
            window,
            bytes_sent: 0,
            state: SessionState::Idle,
            speed: SpeedCalculator::default(),
        }
    }

    /// Moves to `Active` and returns the `file-start` message to send.
    ///
    /// An empty file is complete as soon as it has been announced.
    pub fn begin(&mut self) -> Result<TransferMessage, TransferError> {
        if self.state != SessionState::Idle {
            return Err(TransferError::ProtocolViolation(format!(
                "send session for {} already started",
                self.descriptor.file_name
            )));
        }

        self.state = if self.descriptor.total_size == 0 {
            SessionState::Complete
        } else {
            SessionState::Active
        };
        info!(
            file_name = %self.descriptor.file_name,
            total_size = self.descriptor.total_size,
            window = self.window,
            "outbound transfer started"
        );

        Ok(TransferMessage::start(
            self.descriptor.file_name.clone(),
            self.descriptor.total_size,
            self.checksum.clone(),
            self.window,
        ))
    }

    /// Accounts for `len` bytes at `offset` that have been handed to the
    /// connection.
    ///
    /// Chunks must be recorded in order and must not run past the announced
    /// size. The last chunk moves the session to `Complete`.
    pub fn record_chunk(
        &mut self,
        offset: u64,
        len: usize,
    ) -> Result<TransferProgress, TransferError> {
        if self.state != SessionState::Active {
            return Err(TransferError::ProtocolViolation(format!(
                "chunk recorded while {:?}",
                self.state
            )));
        }
        if offset != self.bytes_sent {
            return Err(TransferError::ProtocolViolation(format!(
                "chunk at offset {offset} but {} bytes already sent",
                self.bytes_sent
            )));
        }
        let end = offset + len as u64;
        if end > self.descriptor.total_size {
            return Err(TransferError::ProtocolViolation(format!(
                "chunk ends at {end} past announced size {}",
                self.descriptor.total_size
            )));
        }

        self.bytes_sent = end;
        self.speed.record(len as u64);
        trace!(offset, bytes_sent = self.bytes_sent, "chunk sent");

        if self.bytes_sent == self.descriptor.total_size {
            self.state = SessionState::Complete;
            info!(file_name = %self.descriptor.file_name, "outbound transfer complete");
        }
        Ok(self.progress())
    }

    /// Marks the session failed. Returns `false` if it was already terminal.
    pub fn fail(&mut self, error: &TransferError) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Failed;
        warn!(file_name = %self.descriptor.file_name, %error, "outbound transfer failed");
        true
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            role: Role::Sender,
            file_name: self.descriptor.file_name.clone(),
            bytes_transferred: self.bytes_sent,
            total_size: self.descriptor.total_size,
            percent: percent(self.bytes_sent, self.descriptor.total_size),
            bytes_per_second: self.speed.bytes_per_second(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    /// Credit window announced in the `file-start` message.
    pub fn window(&self) -> u32 {
        self.window
    }
}

// ---------------------------------------------------------------------------
// Receiver role
// ---------------------------------------------------------------------------

/// Something the link layer has to act on after feeding a message into a
/// [`ReceiveSession`].
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    /// A new inbound transfer became active.
    Started(TransferDescriptor),
    /// An active transfer was replaced by a new `file-start`. Its partial
    /// data has been dropped.
    Superseded {
        previous: TransferDescriptor,
        received: u64,
    },
    /// Locally derived progress after a chunk was accepted.
    Progress(TransferProgress),
    /// The sender's own percentage, clamped. Never drives state.
    AdvisoryProgress(u8),
    /// The transfer finished and the blob is ready.
    Completed(ReceivedFile),
    /// The transfer ended without a usable blob.
    Failed {
        descriptor: TransferDescriptor,
        error: TransferError,
    },
    /// An unexpected message was discarded or clamped. Not terminal.
    Violation(TransferError),
    /// A `chunk-ack` for this sequence number should go back to the sender.
    SendAck(u64),
}

struct Inbound {
    descriptor: TransferDescriptor,
    window: u32,
    next_seq: u64,
    received: u64,
    reassembler: Reassembler,
    speed: SpeedCalculator,
}

impl Inbound {
    fn progress(&self) -> TransferProgress {
        TransferProgress {
            role: Role::Receiver,
            file_name: self.descriptor.file_name.clone(),
            bytes_transferred: self.received,
            total_size: self.descriptor.total_size,
            percent: percent(self.received, self.descriptor.total_size),
            bytes_per_second: self.speed.bytes_per_second(),
        }
    }
}

/// Receiver-side state machine for one direction of a connection.
///
/// `Idle -> Active -> Complete | Failed`. A terminal session goes back to
/// `Active` on the next `file-start`. Every handler returns the outcomes in
/// the order they happened.
pub struct ReceiveSession {
    state: SessionState,
    inbound: Option<Inbound>,
    verify_checksum: bool,
}

impl ReceiveSession {
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            state: SessionState::Idle,
            inbound: None,
            verify_checksum,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the active transfer, if any.
    pub fn descriptor(&self) -> Option<&TransferDescriptor> {
        self.inbound.as_ref().map(|i| &i.descriptor)
    }

    /// Bytes accepted for the active transfer.
    pub fn bytes_received(&self) -> u64 {
        self.inbound.as_ref().map_or(0, |i| i.received)
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Handles `file-start`: supersedes any active transfer and begins a
    /// fresh one.
    pub fn on_start(&mut self, msg: StartMessage) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();

        if let (SessionState::Active, Some(previous)) = (self.state, self.inbound.take()) {
            warn!(
                file_name = %previous.descriptor.file_name,
                received = previous.received,
                "inbound transfer superseded by a new file-start"
            );
            outcomes.push(ReceiveOutcome::Superseded {
                previous: previous.descriptor,
                received: previous.received,
            });
        }

        let descriptor = TransferDescriptor::new(msg.file_name, msg.total_size);
        let checksum = if self.verify_checksum {
            msg.checksum
        } else {
            None
        };
        info!(
            file_name = %descriptor.file_name,
            total_size = descriptor.total_size,
            window = msg.window,
            "inbound transfer started"
        );

        let inbound = Inbound {
            descriptor: descriptor.clone(),
            window: msg.window,
            next_seq: 0,
            received: 0,
            reassembler: Reassembler::new(descriptor.clone(), checksum),
            speed: SpeedCalculator::default(),
        };
        self.inbound = Some(inbound);
        self.state = SessionState::Active;
        outcomes.push(ReceiveOutcome::Started(descriptor));

        if msg.total_size == 0 {
            self.complete(&mut outcomes);
        }
        outcomes
    }

    /// Handles `file-chunk`.
    pub fn on_chunk(&mut self, msg: ChunkMessage) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();

        let inbound = match (self.state, self.inbound.as_mut()) {
            (SessionState::Active, Some(inbound)) => inbound,
            (state, _) => {
                let error = TransferError::ProtocolViolation(format!(
                    "chunk for {} while {state:?}",
                    msg.file_name
                ));
                warn!(file_name = %msg.file_name, seq = ?msg.seq, "discarding unexpected chunk");
                outcomes.push(ReceiveOutcome::Violation(error));
                return outcomes;
            }
        };

        if msg.file_name != inbound.descriptor.file_name {
            warn!(
                expected = %inbound.descriptor.file_name,
                got = %msg.file_name,
                "discarding chunk for another file"
            );
            outcomes.push(ReceiveOutcome::Violation(TransferError::ProtocolViolation(
                format!(
                    "chunk for {} during transfer of {}",
                    msg.file_name, inbound.descriptor.file_name
                ),
            )));
            return outcomes;
        }

        if let Some(seq) = msg.seq {
            if seq < inbound.next_seq {
                warn!(seq, expected = inbound.next_seq, "discarding duplicate chunk");
                outcomes.push(ReceiveOutcome::Violation(TransferError::ProtocolViolation(
                    format!("duplicate chunk {seq}"),
                )));
                return outcomes;
            }
            if seq > inbound.next_seq {
                let error = TransferError::ProtocolViolation(format!(
                    "missing chunk: expected seq {}, got {seq}",
                    inbound.next_seq
                ));
                self.fail(error, &mut outcomes);
                return outcomes;
            }
        }

        let mut payload = msg.payload;
        let remaining = inbound.descriptor.total_size - inbound.received;
        if payload.len() as u64 > remaining {
            let overflow = payload.len() as u64 - remaining;
            warn!(
                file_name = %inbound.descriptor.file_name,
                overflow,
                "chunk runs past announced size, truncating"
            );
            outcomes.push(ReceiveOutcome::Violation(TransferError::ProtocolViolation(
                format!("{overflow} bytes beyond announced size"),
            )));
            payload.truncate(remaining as usize);
        }

        let len = payload.len() as u64;
        if let Err(error) = inbound.reassembler.push(payload) {
            self.fail(error, &mut outcomes);
            return outcomes;
        }
        let seq = inbound.next_seq;
        inbound.next_seq += 1;
        inbound.received += len;
        inbound.speed.record(len);
        trace!(seq, received = inbound.received, "chunk accepted");

        if inbound.window > 0 {
            outcomes.push(ReceiveOutcome::SendAck(seq));
        }
        outcomes.push(ReceiveOutcome::Progress(inbound.progress()));

        if inbound.received == inbound.descriptor.total_size {
            self.complete(&mut outcomes);
        }
        outcomes
    }

    /// Handles `progress`. Advisory only.
    pub fn on_progress(&mut self, msg: ProgressMessage) -> Vec<ReceiveOutcome> {
        let clamped = clamp_percent(msg.percent);
        if i32::from(clamped) != msg.percent {
            debug!(reported = msg.percent, "clamped advisory progress");
        }
        vec![ReceiveOutcome::AdvisoryProgress(clamped)]
    }

    /// Handles `abort`. Only a sender-side abort concerns this session.
    pub fn on_abort(&mut self, msg: AbortMessage) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();
        if msg.side == AbortSide::Sender && self.is_active() {
            self.fail(TransferError::Aborted(msg.reason), &mut outcomes);
        }
        outcomes
    }

    /// The connection closed or errored.
    pub fn on_disconnect(&mut self) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();
        if let Some(inbound) = self.inbound.as_ref().filter(|_| self.is_active()) {
            let error = TransferError::IncompleteTransfer {
                received: inbound.received,
                expected: inbound.descriptor.total_size,
            };
            self.fail(error, &mut outcomes);
        }
        outcomes
    }

    /// No chunk arrived within the stall timeout.
    pub fn on_stall(&mut self) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();
        if self.is_active() {
            self.fail(TransferError::Stalled, &mut outcomes);
        }
        outcomes
    }

    fn complete(&mut self, outcomes: &mut Vec<ReceiveOutcome>) {
        let Some(inbound) = self.inbound.as_mut() else {
            return;
        };
        match inbound.reassembler.finalize() {
            Ok(file) => {
                info!(
                    file_name = %file.file_name(),
                    size = file.len(),
                    "inbound transfer complete"
                );
                self.state = SessionState::Complete;
                self.inbound = None;
                outcomes.push(ReceiveOutcome::Completed(file));
            }
            Err(error) => self.fail(error, outcomes),
        }
    }

    fn fail(&mut self, error: TransferError, outcomes: &mut Vec<ReceiveOutcome>) {
        self.state = SessionState::Failed;
        if let Some(inbound) = self.inbound.take() {
            warn!(
                file_name = %inbound.descriptor.file_name,
                received = inbound.received,
                %error,
                "inbound transfer failed"
            );
            outcomes.push(ReceiveOutcome::Failed {
                descriptor: inbound.descriptor,
                error,
            });
        }
    }
}

impl Default for ReceiveSession {
    fn default() -> Self {
        Self::new(true)
    }
}
