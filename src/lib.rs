//! Catalog Automator - per-establishment catalog normalization jobs
//!
//! Long-running automation jobs (name standardization, automatic and
//! targeted categorization) over an external document store, driven by an
//! external text-classification service, with live progress and log
//! streaming, per-job-type mutual exclusion, call pacing and a durable
//! daily usage ledger.

pub mod automation;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

pub use automation::{AutomationHub, EventBroadcaster, JobController, StartError, UndoStore};
pub use domain::{
    AutomationEvent, DailyUsage, JobConfig, JobProgress, JobSnapshot, JobState, JobType,
    LogEntry, LogLevel,
};
pub use infrastructure::{
    Classifier, ClassifyError, OpenAiClassifier, RecordStore, StoreError, UsageLedger,
};
