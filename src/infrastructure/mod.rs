//! Infrastructure layer: external service boundaries and durable state
//!
//! The document store and the classification service are consumed through
//! the traits defined here; concrete network backends live behind them.
//! The usage ledger and the per-job rate limiter are the two pieces of
//! systems plumbing every job worker shares.

pub mod classifier;
pub mod config;
pub mod logging;
pub mod rate_limiter;
pub mod store;
pub mod usage_ledger;

pub use classifier::{Classification, Classifier, ClassifyError, OpenAiClassifier};
pub use config::{AppConfig, ConfigManager, LoggingConfig, PromptConfig};
pub use rate_limiter::ServiceCallLimiter;
pub use store::{RecordListing, RecordStore, StoreError};
pub use usage_ledger::{UsageLedger, estimate_cost};
