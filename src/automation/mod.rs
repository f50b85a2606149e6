//! The automation job engine
//!
//! One `JobController` per job type owns the run/stop state machine and the
//! worker task of its current run. The `AutomationHub` is the process-wide
//! registry of the three controllers plus the shared event broadcaster,
//! usage ledger and undo store.

pub mod broadcaster;
pub mod controller;
mod pipelines;
pub mod registry;
pub mod undo;
mod worker;

pub use broadcaster::EventBroadcaster;
pub use controller::{JobController, StartError};
pub use registry::AutomationHub;
pub use undo::{UndoRecord, UndoReport, UndoStore};
