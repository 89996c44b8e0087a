//! Devtools inspector: a read-only feed of state transitions.

use crate::error::Result;
use crate::store::Commit;
use crate::types::{Timestamp, Version};
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::Middleware;

/// One committed transition, as shown to an external inspector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Action that produced the commit.
    pub label: String,
    pub previous_version: Version,
    pub version: Version,
    pub committed_at: Timestamp,
    /// Full state after the commit.
    pub state: serde_json::Value,
}

/// Middleware stage feeding a bounded channel.
///
/// A full buffer drops the transition rather than stalling the commit.
pub struct DevtoolsInspector {
    sender: Sender<Transition>,
    dropped: Arc<AtomicU64>,
}

impl DevtoolsInspector {
    /// Create an inspector and the handle that reads from it.
    pub fn new(buffer_size: usize) -> (Self, InspectorHandle) {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                sender,
                dropped: Arc::clone(&dropped),
            },
            InspectorHandle { receiver, dropped },
        )
    }
}

impl<S> Middleware<S> for DevtoolsInspector
where
    S: Serialize + Send + Sync,
{
    fn name(&self) -> &'static str {
        "devtools"
    }

    fn on_commit(&self, commit: &Commit<'_, S>) -> Result<()> {
        trace!(
            label = commit.label,
            from = %commit.previous.version,
            to = %commit.current.version,
            "transition"
        );

        let transition = Transition {
            label: commit.label.to_string(),
            previous_version: commit.previous.version,
            version: commit.current.version,
            committed_at: commit.current.committed_at,
            state: serde_json::to_value(commit.current.state())?,
        };

        match self.sender.try_send(transition) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

/// Read side of a [`DevtoolsInspector`].
pub struct InspectorHandle {
    receiver: Receiver<Transition>,
    dropped: Arc<AtomicU64>,
}

impl InspectorHandle {
    /// Receive the next transition (blocking).
    pub fn recv(&self) -> std::result::Result<Transition, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a transition (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Transition, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Transition, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<Transition> {
        self.receiver.try_iter().collect()
    }

    /// Transitions lost to a full buffer or a dropped handle.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[derive(Clone, Debug, Default, Serialize)]
    struct Flags {
        open: bool,
    }

    #[test]
    fn test_records_transitions() {
        let (inspector, handle) = DevtoolsInspector::new(16);
        let store = Store::builder("test", Flags::default())
            .devtools(Arc::new(inspector))
            .build();

        store.mutate("open", |s| s.open = true);

        let transition = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(transition.label, "open");
        assert_eq!(transition.previous_version, Version(0));
        assert_eq!(transition.version, Version(1));
        assert_eq!(transition.state["open"], true);
    }

    #[test]
    fn test_full_buffer_drops_instead_of_blocking() {
        let (inspector, handle) = DevtoolsInspector::new(2);
        let store = Store::builder("test", Flags::default())
            .devtools(Arc::new(inspector))
            .build();

        for _ in 0..5 {
            store.mutate("toggle", |s| s.open = !s.open);
        }

        assert_eq!(handle.drain().len(), 2);
        assert_eq!(handle.dropped(), 3);
        assert!(store.snapshot().open);
    }
}
