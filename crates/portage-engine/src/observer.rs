//! Best-effort progress observer.
//!
//! Jobs emit events into an optional channel for debugging or UI progress.
//! Emission never blocks the send/receive path: a full channel drops the
//! event and moves on.

use tokio::sync::mpsc;

/// Progress events a job emits over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// One message left a box and hit the wire.
    MessageSent { box_id: u32, bytes: usize },
    /// A gathered transmission was written as one framed unit.
    TransmissionSent { frames: u32, bytes: usize },
    AckReceived,
    AckMissed,
    /// An answer was split and routed into this many messages.
    AnswerDelivered { frames: usize },
    /// An inbound transmission was routed into this many messages.
    Received { frames: usize },
    /// A tick found no pending work.
    Idle,
}

/// Optional event sink. `disabled()` costs nothing per emit.
#[derive(Clone)]
pub struct Observer {
    tx: Option<mpsc::Sender<JobEvent>>,
}

impl Observer {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                tracing::trace!(?event, "observer channel full, event dropped");
            }
        }
    }
}
