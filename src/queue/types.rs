use crate::protocol::FileMetadata;
use crate::queue::error::{QueueError, QueueResult};
use crate::transfer::{ReceivedArtifact, TransferConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Transferring,
    Completed,
    Skipped,
    Failed,
}

impl QueueItemStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Skipped | QueueItemStatus::Failed
        )
    }

    /// Statuses only move forward.
    pub fn can_become(&self, next: QueueItemStatus) -> bool {
        use QueueItemStatus::*;
        matches!(
            (self, next),
            (Pending, Transferring)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Transferring, Completed)
                | (Transferring, Failed)
        )
    }
}

/// One file's record within a multi-file exchange.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub file_index: u32,
    pub metadata: FileMetadata,
    pub status: QueueItemStatus,
    /// Percent in `[0, 100]`
    pub progress: f32,
    pub selected: bool,
    pub error: Option<String>,
    pub received_artifact: Option<ReceivedArtifact>,
}

impl QueueItem {
    pub fn new(file_index: u32, metadata: FileMetadata) -> Self {
        Self {
            file_index,
            metadata,
            status: QueueItemStatus::Pending,
            progress: 0.0,
            selected: false,
            error: None,
            received_artifact: None,
        }
    }

    pub fn advance(&mut self, next: QueueItemStatus) -> QueueResult<()> {
        if !self.status.can_become(next) {
            return Err(QueueError::InvalidStatus {
                index: self.file_index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == QueueItemStatus::Completed {
            self.progress = 100.0;
        }
        Ok(())
    }

    /// Record a failure. Items already in a final status are left alone.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.advance(QueueItemStatus::Failed).is_err() {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Raise progress; never lowers it.
    pub fn set_progress(&mut self, percent: f32) {
        self.progress = self.progress.max(percent.clamp(0.0, 100.0));
    }
}

/// Outcome of one queue exchange. `total_files` counts the selected files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub total_files: usize,
    pub success_count: usize,
    pub failed_count: usize,
}

impl QueueSummary {
    pub fn from_items(items: &[QueueItem]) -> Self {
        let selected = items.iter().filter(|item| item.selected);
        let mut summary = Self {
            total_files: 0,
            success_count: 0,
            failed_count: 0,
        };
        for item in selected {
            summary.total_files += 1;
            match item.status {
                QueueItemStatus::Completed => summary.success_count += 1,
                QueueItemStatus::Failed => summary.failed_count += 1,
                _ => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Listed { files: usize, total_size: u64 },
    Selected { indices: Vec<u32> },
    ItemStarted { file_index: u32, metadata: FileMetadata },
    ItemProgress { file_index: u32, progress: f32 },
    ItemCompleted { file_index: u32 },
    ItemFailed { file_index: u32, error: String },
    ItemSkipped { file_index: u32 },
    Finished(QueueSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long the sender waits for the receiver's file selection
    pub selection_timeout: Duration,

    /// Settings for each file's transfer
    pub transfer: TransferConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            selection_timeout: Duration::from_secs(5 * 60),
            transfer: TransferConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }
}
