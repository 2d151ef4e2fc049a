//! Events reported to callers and the observer interface.

use std::time::Duration;

use peerdrop_transfer::{ReceivedFile, Role, TransferDescriptor, TransferError, TransferProgress};

/// Outcome of a finished outbound transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub file_name: String,
    pub total_size: u64,
    pub chunks: u64,
    pub elapsed: Duration,
}

/// A transfer that reached `Complete`.
#[derive(Debug, Clone)]
pub enum Completion {
    Sent(TransferSummary),
    Received(ReceivedFile),
}

/// Something that happened to a transfer on a link.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started {
        role: Role,
        descriptor: TransferDescriptor,
    },
    /// An inbound transfer was replaced by a new one before completing.
    Superseded {
        previous: TransferDescriptor,
        received: u64,
    },
    Progress(TransferProgress),
    /// Percentage reported by the sending peer. Informational only.
    AdvisoryProgress(u8),
    Completed(Completion),
    Failed {
        role: Role,
        descriptor: TransferDescriptor,
        error: TransferError,
    },
    /// An unexpected message was discarded. The transfer goes on.
    Violation(TransferError),
}

impl TransferEvent {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed(_) | TransferEvent::Failed { .. }
        )
    }

    /// Events that may be dropped when the caller falls behind.
    pub(crate) fn is_lossy(&self) -> bool {
        matches!(
            self,
            TransferEvent::Progress(_) | TransferEvent::AdvisoryProgress(_)
        )
    }
}

/// Synchronous observer invoked by the link as transfers progress.
///
/// Calls happen on the link's own tasks, so implementations should return
/// quickly and hand heavy work off elsewhere.
pub trait TransferObserver: Send + Sync {
    fn on_started(&self, _role: Role, _descriptor: &TransferDescriptor) {}

    fn on_superseded(&self, _previous: &TransferDescriptor, _received: u64) {}

    fn on_progress(&self, _progress: &TransferProgress) {}

    fn on_advisory_progress(&self, _percent: u8) {}

    fn on_complete(&self, _completion: &Completion) {}

    fn on_failed(&self, _role: Role, _descriptor: &TransferDescriptor, _error: &TransferError) {}

    fn on_violation(&self, _error: &TransferError) {}

    /// Entry point used by the link. Dispatches to the specific methods.
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Started { role, descriptor } => self.on_started(*role, descriptor),
            TransferEvent::Superseded { previous, received } => {
                self.on_superseded(previous, *received)
            }
            TransferEvent::Progress(progress) => self.on_progress(progress),
            TransferEvent::AdvisoryProgress(percent) => self.on_advisory_progress(*percent),
            TransferEvent::Completed(completion) => self.on_complete(completion),
            TransferEvent::Failed {
                role,
                descriptor,
                error,
            } => self.on_failed(*role, descriptor, error),
            TransferEvent::Violation(error) => self.on_violation(error),
        }
    }
}

/// Callback type for observing every event.
pub type EventCallback = Box<dyn Fn(&TransferEvent) + Send + Sync>;

/// Observer backed by a single closure.
pub struct CallbackObserver {
    callback: EventCallback,
}

impl CallbackObserver {
    pub fn new(callback: impl Fn(&TransferEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl TransferObserver for CallbackObserver {
    fn on_event(&self, event: &TransferEvent) {
        (self.callback)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl TransferObserver for Recorder {
        fn on_started(&self, _role: Role, _descriptor: &TransferDescriptor) {
            self.calls.lock().unwrap().push("started");
        }

        fn on_failed(&self, _role: Role, _descriptor: &TransferDescriptor, _error: &TransferError) {
            self.calls.lock().unwrap().push("failed");
        }
    }

    #[test]
    fn default_dispatch_routes_to_methods() {
        let recorder = Recorder::default();
        let descriptor = TransferDescriptor::new("f", 1);
        recorder.on_event(&TransferEvent::Started {
            role: Role::Receiver,
            descriptor: descriptor.clone(),
        });
        recorder.on_event(&TransferEvent::AdvisoryProgress(50));
        recorder.on_event(&TransferEvent::Failed {
            role: Role::Receiver,
            descriptor,
            error: TransferError::Stalled,
        });
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["started", "failed"]);
    }

    #[test]
    fn callback_observer_sees_everything() {
        let seen = std::sync::Arc::new(Mutex::new(0));
        let counter = seen.clone();
        let observer = CallbackObserver::new(move |_| *counter.lock().unwrap() += 1);
        observer.on_event(&TransferEvent::AdvisoryProgress(1));
        observer.on_event(&TransferEvent::Violation(TransferError::Stalled));
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn terminal_and_lossy_events() {
        assert!(TransferEvent::Failed {
            role: Role::Sender,
            descriptor: TransferDescriptor::new("f", 1),
            error: TransferError::Cancelled,
        }
        .is_terminal());
        assert!(!TransferEvent::AdvisoryProgress(3).is_terminal());
        assert!(TransferEvent::AdvisoryProgress(3).is_lossy());
        assert!(!TransferEvent::Violation(TransferError::Stalled).is_lossy());
    }
}
