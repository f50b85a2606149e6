//! Core domain types for catalog automation jobs
//!
//! Everything in this module is plain data: job state machine values,
//! catalog records, progress snapshots and the events published to
//! observers. No I/O happens here.

pub mod catalog;
pub mod events;
pub mod job;
pub mod usage;

pub use catalog::{Category, CurrentRecord, ProductRecord, ProductUpdate, ShelfEntry, Subcategory};
pub use events::AutomationEvent;
pub use job::{
    JobConfig, JobProgress, JobRun, JobSnapshot, JobState, JobType, LogBuffer, LogEntry, LogLevel,
};
pub use usage::DailyUsage;
