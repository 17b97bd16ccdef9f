//! Tool-approval plumbing. The toolset raises approval requests on an
//! unbounded queue; a background task owned by the step loop forwards them
//! one at a time to the wire, fire-and-forget, for as long as the step runs.

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub summary: String,
}

impl ApprovalRequest {
    pub fn new(tool_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            summary: summary.into(),
        }
    }
}

/// Producer half, handed to the toolset.
#[derive(Debug, Clone)]
pub struct ApprovalSender {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ApprovalSender {
    pub fn send(&self, request: ApprovalRequest) {
        if self.tx.send(request).is_err() {
            tracing::debug!("approval queue closed; dropping request");
        }
    }
}

/// Consumer half, drained by the forwarding task. The receiver sits behind a
/// mutex so the queue can outlive any single step's forwarding task.
#[derive(Debug)]
pub struct ApprovalQueue {
    rx: Mutex<mpsc::UnboundedReceiver<ApprovalRequest>>,
}

impl ApprovalQueue {
    pub fn channel() -> (ApprovalSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ApprovalSender { tx }, Self { rx: Mutex::new(rx) })
    }

    /// Wait for the next request. `None` once every sender is dropped.
    pub async fn fetch(&self) -> Option<ApprovalRequest> {
        self.rx.lock().await.recv().await
    }
}
