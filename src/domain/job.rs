//! Job state machine and progress tracking
//!
//! A `JobRun` is the single mutable value describing one execution of one
//! automation job. It is owned by its controller behind an `RwLock`; readers
//! always receive a `JobSnapshot` copy so they never observe a torn update.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::CurrentRecord;

/// Maximum number of buffered log entries per job. Oldest entries are
/// evicted first once the buffer is full.
pub const MAX_LOG_ENTRIES: usize = 100;

/// The three automation flows supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    NameStandardizer,
    AutoCategorizer,
    TargetedCategorizer,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::NameStandardizer,
        JobType::AutoCategorizer,
        JobType::TargetedCategorizer,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::NameStandardizer => "name_standardizer",
            JobType::AutoCategorizer => "auto_categorizer",
            JobType::TargetedCategorizer => "targeted_categorizer",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job run.
///
/// `Running -> StopRequested` happens on a stop request; the worker observes
/// it at the next record checkpoint and moves to `Stopped`. Natural
/// completion also ends in `Stopped`. The terminal state is retained until
/// the next accepted start overwrites the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl JobState {
    /// Running and StopRequested both count as active for the per-type
    /// mutual exclusion check in `start`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::StopRequested)
    }
}

/// Operator-supplied parameters for one run. Captured at start and never
/// mutated mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub establishment_id: String,
    /// Minimum delay in seconds between consecutive classification calls.
    pub delay_seconds: f64,
    /// Compute and report proposed changes without persisting them.
    pub dry_run: bool,
    /// Restrict the candidate record set to records tagged with any of
    /// these category ids. Empty means no filter.
    #[serde(default)]
    pub filter_category_ids: Vec<String>,
    /// Categories removed from the automatic categorizer's choice set
    /// (typically the ones managed by the targeted mode).
    #[serde(default)]
    pub exclude_category_ids: Vec<String>,
    /// Fixed category for the targeted categorizer.
    #[serde(default)]
    pub target_category_id: Option<String>,
    /// Targeted mode: also evaluate records from other categories and let
    /// the classifier decide whether they belong to the target category.
    #[serde(default)]
    pub include_others: bool,
    /// Operator override for the default prompt template.
    #[serde(default)]
    pub prompt_override: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            establishment_id: String::new(),
            delay_seconds: 0.5,
            dry_run: false,
            filter_category_ids: Vec::new(),
            exclude_category_ids: Vec::new(),
            target_category_id: None,
            include_others: false,
            prompt_override: None,
        }
    }
}

impl JobConfig {
    /// Validate the config for a given job type. Returns a human readable
    /// rejection reason on failure.
    pub fn validate(&self, job_type: JobType) -> Result<(), String> {
        if self.establishment_id.trim().is_empty() {
            return Err("establishment id must not be empty".to_string());
        }
        if !self.delay_seconds.is_finite() || self.delay_seconds < 0.0 {
            return Err(format!(
                "delay must be a non-negative number of seconds, got {}",
                self.delay_seconds
            ));
        }
        if job_type == JobType::TargetedCategorizer {
            match &self.target_category_id {
                Some(id) if !id.trim().is_empty() => {}
                _ => return Err("targeted mode requires a target category id".to_string()),
            }
        }
        Ok(())
    }
}

/// Mutable counters for one run. All counters are monotonically
/// non-decreasing within a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: u64,
    pub processed: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
    pub tokens_used: u64,
    pub estimated_cost: f64,
}

/// Severity levels surfaced to observers, matching the dashboard's four
/// display levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// One buffered log line. `seq` increases monotonically per job type and
/// survives across runs, so it can be used as a resume cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded ring buffer of log entries.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

impl LogBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, evicting the oldest entry when full. Returns a
    /// clone of the appended entry for event publication.
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        self.next_seq += 1;
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// All buffered entries, optionally only those newer than a cursor.
    #[must_use]
    pub fn since(&self, cursor: Option<u64>) -> Vec<LogEntry> {
        match cursor {
            None => self.entries.iter().cloned().collect(),
            Some(seq) => self.entries.iter().filter(|e| e.seq > seq).cloned().collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Start a fresh buffer for a new run while keeping the sequence
    /// counter monotone across runs.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: self.next_seq,
        }
    }
}

/// One execution of one job type. Owned exclusively by its controller.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job_type: JobType,
    pub run_id: Option<String>,
    pub state: JobState,
    pub config: Option<JobConfig>,
    pub progress: JobProgress,
    pub current_record: Option<CurrentRecord>,
    pub logs: LogBuffer,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRun {
    /// The value a controller holds before any run was ever started.
    #[must_use]
    pub fn idle(job_type: JobType) -> Self {
        Self {
            job_type,
            run_id: None,
            state: JobState::Idle,
            config: None,
            progress: JobProgress::default(),
            current_record: None,
            logs: LogBuffer::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// A freshly accepted run in state Running. The log buffer is cleared
    /// but its sequence counter continues from the previous run.
    #[must_use]
    pub fn started(job_type: JobType, config: JobConfig, previous_logs: &LogBuffer) -> Self {
        Self {
            job_type,
            run_id: Some(Uuid::new_v4().to_string()),
            state: JobState::Running,
            config: Some(config),
            progress: JobProgress::default(),
            current_record: None,
            logs: previous_logs.fresh(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    /// Consistent copy for status reads and event payloads.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_type: self.job_type,
            run_id: self.run_id.clone(),
            state: self.state,
            config: self.config.clone(),
            progress: self.progress.clone(),
            current_record: self.current_record.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only copy of a job run, safe to hand to any thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_type: JobType,
    pub run_id: Option<String>,
    pub state: JobState,
    pub config: Option<JobConfig>,
    pub progress: JobProgress,
    pub current_record: Option<CurrentRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
