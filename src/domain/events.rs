//! Events published to observers through the broadcaster
//!
//! Delivery is best-effort: publishers never block on subscribers, and a
//! late joiner only receives the synthetic status snapshots emitted at
//! subscription time plus everything from then on.

use serde::Serialize;

use crate::domain::catalog::CurrentRecord;
use crate::domain::job::{JobProgress, JobSnapshot, JobType, LogEntry};
use crate::domain::usage::DailyUsage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    /// Counters changed for a job; carries the latest values.
    ProgressUpdate {
        job_type: JobType,
        progress: JobProgress,
        current_record: Option<CurrentRecord>,
    },
    /// One line was appended to a job's log buffer.
    LogUpdate { job_type: JobType, entry: LogEntry },
    /// Full state of one job, emitted on terminal transitions and to new
    /// subscribers.
    StatusSnapshot { snapshot: JobSnapshot },
    /// Today's ledger entry after an external call was recorded.
    UsageUpdate { entry: DailyUsage },
}

impl AutomationEvent {
    /// The job this event concerns, if any. Usage updates are global.
    #[must_use]
    pub fn job_type(&self) -> Option<JobType> {
        match self {
            AutomationEvent::ProgressUpdate { job_type, .. }
            | AutomationEvent::LogUpdate { job_type, .. } => Some(*job_type),
            AutomationEvent::StatusSnapshot { snapshot } => Some(snapshot.job_type),
            AutomationEvent::UsageUpdate { .. } => None,
        }
    }
}
