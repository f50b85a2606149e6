//! Process-wide registry of job controllers
//!
//! The hub is constructed once at startup and lives for the process
//! lifetime. It wires the three controllers to the shared store,
//! classifier, ledger, broadcaster and undo store, and is the single
//! entry point the presentation layer talks to.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::automation::broadcaster::EventBroadcaster;
use crate::automation::controller::{JobController, StartError};
use crate::automation::undo::{UndoRecord, UndoReport, UndoStore};
use crate::domain::events::AutomationEvent;
use crate::domain::job::{JobConfig, JobSnapshot, JobType, LogEntry};
use crate::domain::usage::DailyUsage;
use crate::infrastructure::classifier::Classifier;
use crate::infrastructure::store::RecordStore;
use crate::infrastructure::usage_ledger::UsageLedger;

pub struct AutomationHub {
    name_standardizer: Arc<JobController>,
    auto_categorizer: Arc<JobController>,
    targeted_categorizer: Arc<JobController>,
    broadcaster: Arc<EventBroadcaster>,
    ledger: Arc<UsageLedger>,
    undo: Arc<UndoStore>,
    store: Arc<dyn RecordStore>,
}

impl AutomationHub {
    pub fn new(
        store: Arc<dyn RecordStore>,
        classifier: Arc<dyn Classifier>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::default());
        let undo = Arc::new(UndoStore::new());

        let controller = |job_type| {
            Arc::new(JobController::new(
                job_type,
                Arc::clone(&store),
                Arc::clone(&classifier),
                Arc::clone(&ledger),
                Arc::clone(&broadcaster),
                Arc::clone(&undo),
            ))
        };

        Self {
            name_standardizer: controller(JobType::NameStandardizer),
            auto_categorizer: controller(JobType::AutoCategorizer),
            targeted_categorizer: controller(JobType::TargetedCategorizer),
            broadcaster,
            ledger,
            undo,
            store,
        }
    }

    #[must_use]
    pub fn controller(&self, job_type: JobType) -> &Arc<JobController> {
        match job_type {
            JobType::NameStandardizer => &self.name_standardizer,
            JobType::AutoCategorizer => &self.auto_categorizer,
            JobType::TargetedCategorizer => &self.targeted_categorizer,
        }
    }

    pub async fn start(&self, job_type: JobType, config: JobConfig) -> Result<(), StartError> {
        self.controller(job_type).start(config).await
    }

    pub async fn stop(&self, job_type: JobType) -> bool {
        self.controller(job_type).stop().await
    }

    pub async fn status(&self, job_type: JobType) -> JobSnapshot {
        self.controller(job_type).status().await
    }

    pub async fn status_all(&self) -> Vec<JobSnapshot> {
        let mut snapshots = Vec::with_capacity(JobType::ALL.len());
        for job_type in JobType::ALL {
            snapshots.push(self.status(job_type).await);
        }
        snapshots
    }

    pub async fn logs(&self, job_type: JobType, since: Option<u64>) -> Vec<LogEntry> {
        self.controller(job_type).logs(since).await
    }

    /// Connect an observer. Returns the synthetic initial events (one
    /// status snapshot per job type plus today's usage) and the live
    /// receiver. The receiver is subscribed before the snapshots are
    /// taken, so an observer may see a state twice but never misses a
    /// transition.
    pub async fn subscribe(
        &self,
    ) -> (Vec<AutomationEvent>, broadcast::Receiver<AutomationEvent>) {
        let rx = self.broadcaster.subscribe();
        let mut initial = Vec::with_capacity(JobType::ALL.len() + 1);
        for snapshot in self.status_all().await {
            initial.push(AutomationEvent::StatusSnapshot { snapshot });
        }
        initial.push(AutomationEvent::UsageUpdate {
            entry: self.ledger.today().await,
        });
        (initial, rx)
    }

    pub async fn usage_today(&self) -> DailyUsage {
        self.ledger.today().await
    }

    pub async fn usage_history(&self) -> BTreeMap<String, DailyUsage> {
        self.ledger.all().await
    }

    /// Undo history of the last completed run of a job type.
    pub async fn undo_info(&self, job_type: JobType) -> Vec<UndoRecord> {
        self.undo.info(job_type).await
    }

    /// Replay the last run's writes in reverse.
    pub async fn undo_last_run(&self, job_type: JobType) -> UndoReport {
        self.undo.undo_all(job_type, self.store.as_ref()).await
    }
}
