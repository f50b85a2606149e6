//! Per-job-type run controller
//!
//! Owns the single `JobRun` value for its job type and enforces the
//! at-most-one-active-run invariant. `start` validates, swaps in a fresh
//! run and spawns the worker task; `stop` flips the state machine to
//! StopRequested and cancels the worker's token. Status and log reads are
//! consistent-snapshot copies.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::automation::broadcaster::EventBroadcaster;
use crate::automation::undo::UndoStore;
use crate::automation::worker::{self, WorkerContext};
use crate::domain::events::AutomationEvent;
use crate::domain::job::{JobConfig, JobRun, JobSnapshot, JobState, JobType, LogEntry, LogLevel};
use crate::infrastructure::classifier::Classifier;
use crate::infrastructure::rate_limiter::ServiceCallLimiter;
use crate::infrastructure::store::RecordStore;
use crate::infrastructure::usage_ledger::UsageLedger;

/// Why a start request was rejected. No job state changes on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("a run of this job type is already active")]
    AlreadyRunning,

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },
}

pub struct JobController {
    job_type: JobType,
    run: Arc<RwLock<JobRun>>,
    cancel: Mutex<CancellationToken>,
    store: Arc<dyn RecordStore>,
    classifier: Arc<dyn Classifier>,
    ledger: Arc<UsageLedger>,
    broadcaster: Arc<EventBroadcaster>,
    undo: Arc<UndoStore>,
}

impl JobController {
    pub fn new(
        job_type: JobType,
        store: Arc<dyn RecordStore>,
        classifier: Arc<dyn Classifier>,
        ledger: Arc<UsageLedger>,
        broadcaster: Arc<EventBroadcaster>,
        undo: Arc<UndoStore>,
    ) -> Self {
        Self {
            job_type,
            run: Arc::new(RwLock::new(JobRun::idle(job_type))),
            cancel: Mutex::new(CancellationToken::new()),
            store,
            classifier,
            ledger,
            broadcaster,
            undo,
        }
    }

    #[must_use]
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Accept and launch a new run, or reject without side effects.
    /// Returns as soon as the worker task is spawned; never blocks for
    /// completion.
    pub async fn start(&self, config: JobConfig) -> Result<(), StartError> {
        config
            .validate(self.job_type)
            .map_err(|reason| StartError::ConfigInvalid { reason })?;

        let cancel = CancellationToken::new();
        {
            let mut run = self.run.write().await;
            if run.state.is_active() {
                return Err(StartError::AlreadyRunning);
            }
            let fresh = JobRun::started(self.job_type, config.clone(), &run.logs);
            *run = fresh;
            // The token swap must complete before Running becomes visible,
            // so a stop that observes this run always cancels this run's
            // token. Lock order run -> cancel, same as stop().
            *self.cancel.lock().await = cancel.clone();
        }

        self.undo.clear(self.job_type).await;

        info!(job = %self.job_type, establishment = %config.establishment_id, "run accepted");
        let ctx = WorkerContext {
            job_type: self.job_type,
            limiter: ServiceCallLimiter::from_seconds(config.delay_seconds),
            config,
            run: Arc::clone(&self.run),
            cancel,
            store: Arc::clone(&self.store),
            classifier: Arc::clone(&self.classifier),
            ledger: Arc::clone(&self.ledger),
            broadcaster: Arc::clone(&self.broadcaster),
            undo: Arc::clone(&self.undo),
        };
        tokio::spawn(worker::run_job(ctx));
        Ok(())
    }

    /// Request a cooperative stop. Accepted only while Running; stopping an
    /// idle or finished job is a no-op, not an error. The worker observes
    /// the request at its next record checkpoint.
    pub async fn stop(&self) -> bool {
        let entry = {
            let mut run = self.run.write().await;
            if run.state != JobState::Running {
                return false;
            }
            run.state = JobState::StopRequested;
            // Cancel while still holding the run lock: the installed token
            // is guaranteed to belong to the run observed above.
            self.cancel.lock().await.cancel();
            run.logs.push(LogLevel::Warning, "Stop requested by operator")
        };
        self.broadcaster.publish(AutomationEvent::LogUpdate {
            job_type: self.job_type,
            entry,
        });
        info!(job = %self.job_type, "stop requested");
        true
    }

    /// Read-only copy of the current run. Safe from any task.
    pub async fn status(&self) -> JobSnapshot {
        self.run.read().await.snapshot()
    }

    /// Buffered log entries, optionally only those newer than a cursor.
    pub async fn logs(&self, since: Option<u64>) -> Vec<LogEntry> {
        self.run.read().await.logs.since(since)
    }
}
