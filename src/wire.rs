//! The event sink: a purely-outbound channel the core publishes lifecycle
//! and approval events to. Send is non-blocking from the core's perspective;
//! a closed sink drops events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::approval::ApprovalRequest;

/// Immutable snapshot of the soul's current status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Fraction of the context window in use.
    pub context_usage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    StepBegin { step_no: usize },
    StepInterrupted,
    CompactionBegin,
    CompactionEnd,
    StatusUpdate { status: StatusSnapshot },
    ApprovalForwarded(ApprovalRequest),
}

#[derive(Debug, Clone)]
pub struct Wire {
    tx: mpsc::UnboundedSender<WireEvent>,
}

impl Wire {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WireEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget send. No acknowledgment is required from the sink.
    pub fn send(&self, event: WireEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("wire receiver closed; dropping event");
        }
    }
}
