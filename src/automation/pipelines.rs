//! Per-record transforms for the three job types
//!
//! The worker loop is identical across job types; only the transform
//! applied to each record differs. Categorization is a two-stage decision:
//! first a category id from the full category set (or the operator-fixed
//! target), then a subcategory id from that category's subcategories only.

use std::collections::HashMap;

use anyhow::{Context, bail};
use async_trait::async_trait;

use crate::automation::worker::WorkerContext;
use crate::domain::catalog::{Category, ProductRecord, ProductUpdate, Subcategory};
use crate::domain::job::{JobType, LogLevel};
use crate::infrastructure::classifier::ClassifyError;
use crate::infrastructure::config::{
    DEFAULT_CATEGORIZER_SYSTEM_PROMPT, DEFAULT_RENAMER_PROMPT,
};

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordOutcome {
    /// An update was dispatched (or simulated under dry run).
    Updated,
    /// The proposed value matched the current record.
    Unchanged,
    /// Targeted mode: the classifier declined membership.
    Skipped,
}

#[derive(Debug, Clone)]
pub(crate) enum RecordFailure {
    /// Counted as an error; the run continues with the next record.
    Recoverable(String),
    /// Aborts the run (service quota exhausted).
    Fatal(String),
}

impl From<ClassifyError> for RecordFailure {
    fn from(e: ClassifyError) -> Self {
        if e.is_fatal() {
            RecordFailure::Fatal(format!("{e} - aborting run"))
        } else {
            RecordFailure::Recoverable(format!("classification failed: {e}"))
        }
    }
}

#[async_trait]
pub(crate) trait JobPipeline: Send {
    async fn process(
        &mut self,
        ctx: &WorkerContext,
        record: &ProductRecord,
    ) -> Result<RecordOutcome, RecordFailure>;
}

/// Resolve the pipeline for a run, loading whatever reference data it
/// needs up front. Errors here are fatal to the run.
pub(crate) async fn build(ctx: &WorkerContext) -> anyhow::Result<Box<dyn JobPipeline>> {
    let config = &ctx.config;
    match ctx.job_type {
        JobType::NameStandardizer => {
            let prompt = config
                .prompt_override
                .clone()
                .unwrap_or_else(|| DEFAULT_RENAMER_PROMPT.to_string());
            Ok(Box::new(NameStandardizer { prompt }))
        }
        JobType::AutoCategorizer => {
            let mut categories = ctx
                .store
                .list_categories(&config.establishment_id)
                .await
                .context("failed to load categories")?;
            categories.retain(|c| {
                !config
                    .exclude_category_ids
                    .iter()
                    .any(|ex| ex.eq_ignore_ascii_case(&c.id))
            });
            if categories.is_empty() {
                bail!("no categories available after applying exclusions");
            }
            Ok(Box::new(AutoCategorizer {
                system_prompt: system_prompt(config),
                categories,
                subcategory_cache: HashMap::new(),
            }))
        }
        JobType::TargetedCategorizer => {
            // Validation guarantees the target id is present.
            let target_id = config.target_category_id.clone().unwrap_or_default();
            let categories = ctx
                .store
                .list_categories(&config.establishment_id)
                .await
                .context("failed to load categories")?;
            let target = categories
                .into_iter()
                .find(|c| c.id == target_id)
                .with_context(|| format!("target category '{target_id}' not found"))?;
            let subcategories = ctx
                .store
                .list_subcategories(&config.establishment_id, &target.id)
                .await
                .context("failed to load target subcategories")?;
            if subcategories.is_empty() {
                bail!("no subcategories for target category '{target_id}'");
            }
            Ok(Box::new(TargetedCategorizer {
                system_prompt: system_prompt(config),
                subcategory_lines: catalog_lines(&subcategories),
                target,
                subcategories,
            }))
        }
    }
}

fn system_prompt(config: &crate::domain::job::JobConfig) -> String {
    config
        .prompt_override
        .clone()
        .unwrap_or_else(|| DEFAULT_CATEGORIZER_SYSTEM_PROMPT.to_string())
}

struct NameStandardizer {
    prompt: String,
}

#[async_trait]
impl JobPipeline for NameStandardizer {
    async fn process(
        &mut self,
        ctx: &WorkerContext,
        record: &ProductRecord,
    ) -> Result<RecordOutcome, RecordFailure> {
        let full_prompt = format!(
            "{}\n\nNome atual: {}\n\nNome melhorado (diferente do original):",
            self.prompt, record.name
        );
        let classification = ctx
            .classify_and_record(None, &full_prompt, 100, 0.3)
            .await?;

        let new_name = title_case(&classification.value);
        let update = ProductUpdate::Rename {
            name: new_name.clone(),
        };
        if !update.differs_from(record) {
            ctx.log(LogLevel::Info, "  -> No change").await;
            return Ok(RecordOutcome::Unchanged);
        }

        let previous = ProductUpdate::Rename {
            name: record.name.clone(),
        };
        let describe = format!("'{}' => '{}'", record.name, new_name);
        ctx.apply_update(record, previous, update, &describe).await?;
        Ok(RecordOutcome::Updated)
    }
}

struct AutoCategorizer {
    system_prompt: String,
    categories: Vec<Category>,
    subcategory_cache: HashMap<String, Vec<Subcategory>>,
}

impl AutoCategorizer {
    async fn subcategories_for(
        &mut self,
        ctx: &WorkerContext,
        category_id: &str,
    ) -> Result<Vec<Subcategory>, RecordFailure> {
        if let Some(subs) = self.subcategory_cache.get(category_id) {
            return Ok(subs.clone());
        }
        let subs = ctx
            .store
            .list_subcategories(&ctx.config.establishment_id, category_id)
            .await
            .map_err(|e| {
                RecordFailure::Recoverable(format!(
                    "failed to load subcategories for '{category_id}': {e}"
                ))
            })?;
        self.subcategory_cache
            .insert(category_id.to_string(), subs.clone());
        Ok(subs)
    }
}

#[async_trait]
impl JobPipeline for AutoCategorizer {
    async fn process(
        &mut self,
        ctx: &WorkerContext,
        record: &ProductRecord,
    ) -> Result<RecordOutcome, RecordFailure> {
        // Stage 1: pick a category from the full set.
        let category_prompt = format!(
            "Produto: \"{}\"\n\nCategorias disponiveis:\n{}\n\n\
             Qual e o id da categoria mais adequada para este produto? \
             Responda APENAS com o id exato da categoria.",
            record.name,
            catalog_lines(&self.categories)
        );
        let raw_category = ctx
            .classify_and_record(Some(&self.system_prompt), &category_prompt, 60, 0.1)
            .await?;
        let category = best_match(&raw_category.value, &self.categories)
            .cloned()
            .ok_or_else(|| {
                RecordFailure::Recoverable(format!(
                    "could not determine category for '{}'",
                    record.name
                ))
            })?;

        // Stage 2: pick a subcategory from the chosen category only.
        let subcategories = self.subcategories_for(ctx, &category.id).await?;
        let subcategory = if subcategories.is_empty() {
            ctx.log(
                LogLevel::Warning,
                format!("  No subcategories for '{}', assigning category only", category.id),
            )
            .await;
            None
        } else {
            let sub_prompt = format!(
                "Produto: \"{}\"\nCategoria: {}\n\nSubcategorias disponiveis:\n{}\n\n\
                 Qual e o id da subcategoria mais adequada para este produto? \
                 Responda APENAS com o id exato da subcategoria.",
                record.name,
                category.id,
                catalog_lines(&subcategories)
            );
            match ctx
                .classify_and_record(Some(&self.system_prompt), &sub_prompt, 100, 0.1)
                .await
            {
                Ok(c) => best_match(&c.value, &subcategories).cloned(),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    // Category is already decided; fall back to the first
                    // subcategory rather than losing the record.
                    ctx.log(
                        LogLevel::Warning,
                        format!("  Subcategory selection failed ({e}), using first"),
                    )
                    .await;
                    subcategories.first().cloned()
                }
            }
        };

        finish_assignment(ctx, record, &category, subcategory.as_ref()).await
    }
}

struct TargetedCategorizer {
    system_prompt: String,
    target: Category,
    subcategories: Vec<Subcategory>,
    subcategory_lines: String,
}

#[async_trait]
impl JobPipeline for TargetedCategorizer {
    async fn process(
        &mut self,
        ctx: &WorkerContext,
        record: &ProductRecord,
    ) -> Result<RecordOutcome, RecordFailure> {
        let already_tagged = record.categories_ids.contains(&self.target.id);

        let subcategory = if already_tagged || !ctx.config.include_others {
            let sub_prompt = format!(
                "Produto: \"{}\"\nCategoria: {} ({})\n\nSubcategorias disponiveis:\n{}\n\n\
                 Qual e o id da subcategoria mais adequada? Responda APENAS com o id exato.",
                record.name, self.target.id, self.target.name, self.subcategory_lines
            );
            let classification = ctx
                .classify_and_record(Some(&self.system_prompt), &sub_prompt, 100, 0.1)
                .await?;
            best_match(&classification.value, &self.subcategories).cloned()
        } else {
            // Record from another category: ask whether it belongs to the
            // target at all before assigning.
            let membership_prompt = format!(
                "Produto: \"{}\"\nCategoria alvo: {} ({})\n\n\
                 Subcategorias da categoria alvo:\n{}\n\n\
                 Este produto pertence a esta categoria? Se sim, responda APENAS com o id \
                 da subcategoria mais adequada. Se nao, responda APENAS com NAO.",
                record.name, self.target.id, self.target.name, self.subcategory_lines
            );
            let classification = ctx
                .classify_and_record(Some(&self.system_prompt), &membership_prompt, 100, 0.1)
                .await?;
            let answer = classification.value.trim();
            if answer.eq_ignore_ascii_case("nao") || answer.eq_ignore_ascii_case("não") {
                ctx.log(
                    LogLevel::Info,
                    format!("  -> Does not belong to '{}', skipped", self.target.name),
                )
                .await;
                return Ok(RecordOutcome::Skipped);
            }
            best_match(answer, &self.subcategories).cloned()
        };

        finish_assignment(ctx, record, &self.target, subcategory.as_ref()).await
    }
}

/// Compare the assignment against the record, then dispatch it.
async fn finish_assignment(
    ctx: &WorkerContext,
    record: &ProductRecord,
    category: &Category,
    subcategory: Option<&Subcategory>,
) -> Result<RecordOutcome, RecordFailure> {
    let update = ProductUpdate::categorize(category, subcategory);
    if !update.differs_from(record) {
        ctx.log(LogLevel::Info, "  -> No change").await;
        return Ok(RecordOutcome::Unchanged);
    }

    let describe = format!(
        "{} / {}",
        category.name,
        subcategory.map_or("-", |s| s.name.as_str())
    );
    let previous = ProductUpdate::restore_categories(record);
    ctx.apply_update(record, previous, update, &describe).await?;
    Ok(RecordOutcome::Updated)
}

/// "id=.. | nome=.." lines fed to the classifier.
fn catalog_lines<T: CatalogItem>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("id={} | nome={}", i.item_id(), i.item_name()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) trait CatalogItem {
    fn item_id(&self) -> &str;
    fn item_name(&self) -> &str;
}

impl CatalogItem for Category {
    fn item_id(&self) -> &str {
        &self.id
    }
    fn item_name(&self) -> &str {
        &self.name
    }
}

impl CatalogItem for Subcategory {
    fn item_id(&self) -> &str {
        &self.id
    }
    fn item_name(&self) -> &str {
        &self.name
    }
}

/// Resolve the id the classifier returned against the valid set: exact
/// match, then case-insensitive, then substring either way, else the first
/// valid item.
pub(crate) fn best_match<'a, T: CatalogItem>(returned: &str, valid: &'a [T]) -> Option<&'a T> {
    let returned = returned.trim();
    if let Some(item) = valid.iter().find(|i| i.item_id() == returned) {
        return Some(item);
    }
    let lower = returned.to_lowercase();
    if let Some(item) = valid.iter().find(|i| i.item_id().to_lowercase() == lower) {
        return Some(item);
    }
    if let Some(item) = valid.iter().find(|i| {
        let id = i.item_id().to_lowercase();
        id.contains(&lower) || lower.contains(&id)
    }) {
        return Some(item);
    }
    valid.first()
}

/// Capitalize each word the way the catalog expects product names.
pub(crate) fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
