//! Test utilities
//!
//! In-memory doubles for the two external collaborators: a record store
//! holding products and categories behind a mutex, and a scripted
//! classifier that replays queued responses. Used by the unit and
//! integration tests; kept deterministic so runs are reproducible.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::domain::catalog::{Category, ProductRecord, ProductUpdate, Subcategory};
use crate::infrastructure::classifier::{Classification, Classifier, ClassifyError};
use crate::infrastructure::store::{RecordListing, RecordStore, StoreError};

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: Vec<ProductRecord>,
    categories: Vec<Category>,
    subcategories: Vec<Subcategory>,
    unreachable: bool,
    failing_record_ids: HashSet<String>,
    total_hint_override: Option<u64>,
    writes: Vec<(String, ProductUpdate)>,
}

/// In-memory record store. Writes are applied to the held records and
/// also journaled for assertions.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: Vec<ProductRecord>) -> Self {
        let store = Self::new();
        store.lock().records = records;
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().expect("memory store poisoned")
    }

    pub fn set_categories(&self, categories: Vec<Category>) {
        self.lock().categories = categories;
    }

    pub fn set_subcategories(&self, subcategories: Vec<Subcategory>) {
        self.lock().subcategories = subcategories;
    }

    /// Make every read fail with `StoreError::Unreachable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make writes to one record id fail.
    /// Override the reported listing size, simulating a backend that can
    /// only estimate counts.
    pub fn set_total_hint(&self, hint: Option<u64>) {
        self.lock().total_hint_override = hint;
    }

    pub fn fail_writes_for(&self, record_id: &str) {
        self.lock().failing_record_ids.insert(record_id.to_string());
    }

    /// Journal of applied writes, in dispatch order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, ProductUpdate)> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn record(&self, record_id: &str) -> Option<ProductRecord> {
        self.lock().records.iter().find(|r| r.id == record_id).cloned()
    }

    #[must_use]
    pub fn records(&self) -> Vec<ProductRecord> {
        self.lock().records.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_records(
        &self,
        _establishment_id: &str,
        category_filter: Option<&[String]>,
    ) -> Result<RecordListing, StoreError> {
        let inner = self.lock();
        if inner.unreachable {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }
        let selected: Vec<ProductRecord> = inner
            .records
            .iter()
            .filter(|r| match category_filter {
                Some(filter) => r.has_any_category(filter),
                None => true,
            })
            .cloned()
            .collect();
        Ok(RecordListing {
            total_hint: inner
                .total_hint_override
                .unwrap_or(selected.len() as u64),
            records: stream::iter(selected.into_iter().map(Ok)).boxed(),
        })
    }

    async fn write_record(
        &self,
        _establishment_id: &str,
        record_id: &str,
        update: &ProductUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.unreachable {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }
        if inner.failing_record_ids.contains(record_id) {
            return Err(StoreError::WriteFailed {
                record_id: record_id.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        let Some(record) = inner.records.iter_mut().find(|r| r.id == record_id) else {
            return Err(StoreError::NotFound(record_id.to_string()));
        };
        match update {
            ProductUpdate::Rename { name } => record.name = name.clone(),
            ProductUpdate::Categorize {
                categories_ids,
                subcategories_ids,
                shelves,
                shelves_ids,
            } => {
                record.categories_ids = categories_ids.clone();
                record.subcategories_ids = subcategories_ids.clone();
                record.shelves = shelves.clone();
                record.shelves_ids = shelves_ids.clone();
            }
        }
        inner.writes.push((record_id.to_string(), update.clone()));
        Ok(())
    }

    async fn list_categories(
        &self,
        _establishment_id: &str,
    ) -> Result<Vec<Category>, StoreError> {
        let inner = self.lock();
        if inner.unreachable {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }
        Ok(inner.categories.clone())
    }

    async fn list_subcategories(
        &self,
        _establishment_id: &str,
        category_id: &str,
    ) -> Result<Vec<Subcategory>, StoreError> {
        let inner = self.lock();
        if inner.unreachable {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }
        Ok(inner
            .subcategories
            .iter()
            .filter(|s| s.category_id == category_id)
            .cloned()
            .collect())
    }
}

/// Classifier double replaying queued responses in order. An exhausted
/// queue answers with a malformed-response error so a test that
/// under-provisions its script fails loudly.
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Result<Classification, ClassifyError>>>,
    prompts: Mutex<Vec<String>>,
    call_delay: Duration,
}

impl ScriptedClassifier {
    #[must_use]
    pub fn new(responses: Vec<Result<Classification, ClassifyError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            call_delay: Duration::ZERO,
        }
    }

    /// Add an artificial per-call latency, for stop/cancellation tests.
    #[must_use]
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        _system_prompt: Option<&str>,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Classification, ClassifyError> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());
        self.responses
            .lock()
            .expect("script poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ClassifyError::MalformedResponse(
                    "script exhausted".to_string(),
                ))
            })
    }
}

/// Classifier double computing its answer from the prompt.
pub struct FnClassifier {
    f: Box<dyn Fn(&str) -> Result<Classification, ClassifyError> + Send + Sync>,
}

impl FnClassifier {
    pub fn new(
        f: impl Fn(&str) -> Result<Classification, ClassifyError> + Send + Sync + 'static,
    ) -> Self {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Classifier for FnClassifier {
    async fn classify(
        &self,
        _system_prompt: Option<&str>,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Classification, ClassifyError> {
        (self.f)(prompt)
    }
}

/// Shorthand for a successful classification with token usage.
#[must_use]
pub fn classification(value: &str, tokens_input: u64, tokens_output: u64) -> Classification {
    Classification {
        value: value.to_string(),
        tokens_input,
        tokens_output,
    }
}

/// A bare product record with no category assignments.
#[must_use]
pub fn product(id: &str, name: &str) -> ProductRecord {
    ProductRecord {
        id: id.to_string(),
        name: name.to_string(),
        categories_ids: Vec::new(),
        subcategories_ids: Vec::new(),
        shelves: Vec::new(),
        shelves_ids: Vec::new(),
    }
}

/// A product record tagged with one category.
#[must_use]
pub fn product_in_category(id: &str, name: &str, category_id: &str) -> ProductRecord {
    ProductRecord {
        categories_ids: vec![category_id.to_string()],
        ..product(id, name)
    }
}
