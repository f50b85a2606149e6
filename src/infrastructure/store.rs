//! Record store boundary
//!
//! The document store holding products, categories and subcategories is an
//! external collaborator. Jobs consume it through this trait: a lazy record
//! stream for iteration plus point writes for accepted updates.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::catalog::{Category, ProductRecord, ProductUpdate, Subcategory};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached at all. Fatal when it happens while
    /// resolving the initial record set.
    #[error("record store unreachable: {0}")]
    Unreachable(String),

    /// A single record write failed. Counted as a per-record error, never
    /// fatal to a run.
    #[error("failed to write record '{record_id}': {reason}")]
    WriteFailed { record_id: String, reason: String },

    #[error("not found in store: {0}")]
    NotFound(String),
}

/// The resolved candidate set for one run.
///
/// `total_hint` is set once at resolution time and may be an estimate when
/// the backend cannot report counts cheaply.
pub struct RecordListing {
    pub total_hint: u64,
    pub records: BoxStream<'static, Result<ProductRecord, StoreError>>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Resolve the candidate records of an establishment, optionally
    /// restricted to records tagged with any of the given category ids.
    async fn list_records(
        &self,
        establishment_id: &str,
        category_filter: Option<&[String]>,
    ) -> Result<RecordListing, StoreError>;

    /// Persist a proposed update to a single record.
    async fn write_record(
        &self,
        establishment_id: &str,
        record_id: &str,
        update: &ProductUpdate,
    ) -> Result<(), StoreError>;

    async fn list_categories(&self, establishment_id: &str)
    -> Result<Vec<Category>, StoreError>;

    /// Subcategories belonging to one category.
    async fn list_subcategories(
        &self,
        establishment_id: &str,
        category_id: &str,
    ) -> Result<Vec<Subcategory>, StoreError>;
}
