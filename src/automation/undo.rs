//! Undo history for applied record updates
//!
//! Each accepted run clears its job type's history and then appends one
//! entry per successful non-dry-run write, capturing the record's previous
//! field values. `undo_all` replays the previous values in reverse order
//! through the store.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::catalog::ProductUpdate;
use crate::domain::job::JobType;
use crate::infrastructure::store::RecordStore;

/// One reversible write.
#[derive(Debug, Clone, Serialize)]
pub struct UndoRecord {
    pub record_id: String,
    pub establishment_id: String,
    pub previous: ProductUpdate,
    pub applied: ProductUpdate,
}

/// Outcome of replaying a job type's undo history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoReport {
    pub restored: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct UndoStore {
    histories: Mutex<HashMap<JobType, Vec<UndoRecord>>>,
}

impl UndoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the history of a job type. Called on every accepted start.
    pub async fn clear(&self, job_type: JobType) {
        self.histories.lock().await.remove(&job_type);
    }

    pub async fn push(&self, job_type: JobType, record: UndoRecord) {
        self.histories
            .lock()
            .await
            .entry(job_type)
            .or_default()
            .push(record);
    }

    /// Snapshot of the current history for a job type.
    pub async fn info(&self, job_type: JobType) -> Vec<UndoRecord> {
        self.histories
            .lock()
            .await
            .get(&job_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Replay previous values in reverse order. Per-record failures are
    /// logged and counted, never escalated. The history is consumed even
    /// when some writes fail, matching the store's state as closely as
    /// possible.
    pub async fn undo_all(&self, job_type: JobType, store: &dyn RecordStore) -> UndoReport {
        let entries = self
            .histories
            .lock()
            .await
            .remove(&job_type)
            .unwrap_or_default();

        let mut report = UndoReport::default();
        for entry in entries.iter().rev() {
            match store
                .write_record(&entry.establishment_id, &entry.record_id, &entry.previous)
                .await
            {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    warn!(
                        record_id = %entry.record_id,
                        error = %e,
                        "failed to restore record during undo"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}
