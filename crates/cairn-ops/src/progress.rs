//! Progress reporting for batch transfers.

use std::path::PathBuf;

use cairn_core::{OperationId, OperationKind};
use serde::Serialize;
use tokio::sync::mpsc;

/// Snapshot of a running batch.
#[derive(Debug, Clone, Serialize)]
pub struct OperationProgress {
    pub id: Option<OperationId>,
    pub kind: OperationKind,
    /// Items committed so far, in source order.
    pub items_completed: usize,
    pub items_total: usize,
    pub bytes_processed: u64,
    /// The item most recently committed.
    pub current: Option<PathBuf>,
}

impl OperationProgress {
    pub fn new(id: Option<OperationId>, kind: OperationKind, items_total: usize) -> Self {
        Self {
            id,
            kind,
            items_completed: 0,
            items_total,
            bytes_processed: 0,
            current: None,
        }
    }

    /// Progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.items_total > 0 {
            (self.items_completed as f64 / self.items_total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Record one committed item.
    pub fn complete_item(&mut self, path: PathBuf, bytes: u64) {
        self.items_completed += 1;
        self.bytes_processed += bytes;
        self.current = Some(path);
    }
}

/// Final report of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct OperationComplete {
    pub id: Option<OperationId>,
    pub kind: OperationKind,
    pub succeeded: usize,
    pub elevated: usize,
    pub bytes_processed: u64,
    /// Set when the batch was rolled back or cancelled.
    pub error: Option<String>,
}

impl OperationComplete {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Delete => "Deleted",
            OperationKind::Rename => "Renamed",
            OperationKind::CreateFile | OperationKind::CreateDirectory => "Created",
        };

        match &self.error {
            None => format!("{action} {} items", self.succeeded),
            Some(error) => format!("{} rolled back: {error}", self.kind),
        }
    }
}

/// Events sent to a progress subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressEvent {
    Progress(OperationProgress),
    Complete(OperationComplete),
}

/// Sender half handed to the engine.
pub type ProgressSender = mpsc::Sender<ProgressEvent>;
