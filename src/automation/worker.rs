//! The shared worker loop executed by every job run
//!
//! All three job types run the same shape: resolve the candidate record
//! set, then process records strictly one at a time, checking the stop
//! token between records, pacing external calls through the rate limiter,
//! and publishing progress/log/usage events after every step. Per-record
//! failures are contained; only an unreadable record source or exhausted
//! service quota aborts a run.

use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::automation::broadcaster::EventBroadcaster;
use crate::automation::pipelines::{self, RecordFailure, RecordOutcome};
use crate::automation::undo::{UndoRecord, UndoStore};
use crate::domain::catalog::{CurrentRecord, ProductRecord, ProductUpdate};
use crate::domain::events::AutomationEvent;
use crate::domain::job::{JobConfig, JobRun, JobState, JobType, LogLevel};
use crate::infrastructure::classifier::{Classification, Classifier, ClassifyError};
use crate::infrastructure::rate_limiter::ServiceCallLimiter;
use crate::infrastructure::store::RecordStore;
use crate::infrastructure::usage_ledger::{UsageLedger, estimate_cost};

/// Everything a worker task needs, captured at start. The config snapshot
/// is immutable for the whole run.
pub(crate) struct WorkerContext {
    pub job_type: JobType,
    pub config: JobConfig,
    pub run: Arc<RwLock<JobRun>>,
    pub cancel: CancellationToken,
    pub limiter: ServiceCallLimiter,
    pub store: Arc<dyn RecordStore>,
    pub classifier: Arc<dyn Classifier>,
    pub ledger: Arc<UsageLedger>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub undo: Arc<UndoStore>,
}

impl WorkerContext {
    /// Append to the run's log buffer and publish the entry.
    pub(crate) async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => info!(job = %self.job_type, "{message}"),
            LogLevel::Warning => warn!(job = %self.job_type, "{message}"),
            LogLevel::Error => error!(job = %self.job_type, "{message}"),
        }
        let entry = self.run.write().await.logs.push(level, message);
        self.broadcaster.publish(AutomationEvent::LogUpdate {
            job_type: self.job_type,
            entry,
        });
    }

    pub(crate) async fn publish_progress(&self) {
        let (progress, current_record) = {
            let run = self.run.read().await;
            (run.progress.clone(), run.current_record.clone())
        };
        self.broadcaster.publish(AutomationEvent::ProgressUpdate {
            job_type: self.job_type,
            progress,
            current_record,
        });
    }

    /// One classification call with full accounting: ledger merge, run
    /// token/cost counters and a usage event. Usage is recorded for every
    /// completed call, dry run or not.
    pub(crate) async fn classify_and_record(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Classification, ClassifyError> {
        let classification = self
            .classifier
            .classify(system_prompt, prompt, max_tokens, temperature)
            .await?;

        let entry = self
            .ledger
            .record(classification.tokens_input, classification.tokens_output)
            .await;
        {
            let mut run = self.run.write().await;
            run.progress.tokens_used +=
                classification.tokens_input + classification.tokens_output;
            run.progress.estimated_cost +=
                estimate_cost(classification.tokens_input, classification.tokens_output);
        }
        self.broadcaster
            .publish(AutomationEvent::UsageUpdate { entry });
        Ok(classification)
    }

    /// Dispatch a proposed update to the store unless this is a dry run,
    /// recording an undo entry on success.
    pub(crate) async fn apply_update(
        &self,
        record: &ProductRecord,
        previous: ProductUpdate,
        update: ProductUpdate,
        describe: &str,
    ) -> Result<(), RecordFailure> {
        if self.config.dry_run {
            self.log(LogLevel::Warning, format!("  [DRY RUN] {describe}"))
                .await;
            return Ok(());
        }

        self.store
            .write_record(&self.config.establishment_id, &record.id, &update)
            .await
            .map_err(|e| RecordFailure::Recoverable(format!("store write failed: {e}")))?;

        self.undo
            .push(
                self.job_type,
                UndoRecord {
                    record_id: record.id.clone(),
                    establishment_id: self.config.establishment_id.clone(),
                    previous,
                    applied: update,
                },
            )
            .await;
        self.log(LogLevel::Success, format!("  -> {describe}")).await;
        Ok(())
    }
}

/// Entry point of the spawned worker task. Always leaves the run in state
/// Stopped and publishes a final status snapshot.
pub(crate) async fn run_job(ctx: WorkerContext) {
    if let Err(fatal) = execute(&ctx).await {
        ctx.log(LogLevel::Error, format!("Run aborted: {fatal}")).await;
    }

    let snapshot = {
        let mut run = ctx.run.write().await;
        run.state = JobState::Stopped;
        run.current_record = None;
        run.finished_at = Some(Utc::now());
        run.snapshot()
    };
    debug!(job = %ctx.job_type, "worker finished, publishing final status");
    ctx.broadcaster
        .publish(AutomationEvent::StatusSnapshot { snapshot });
}

async fn execute(ctx: &WorkerContext) -> anyhow::Result<()> {
    let config = &ctx.config;
    ctx.log(
        LogLevel::Info,
        format!(
            "Starting {} for establishment '{}'",
            ctx.job_type, config.establishment_id
        ),
    )
    .await;
    if config.dry_run {
        ctx.log(LogLevel::Warning, "DRY RUN mode - no updates will be persisted")
            .await;
    }

    let mut pipeline = match pipelines::build(ctx).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            ctx.log(LogLevel::Error, format!("Failed to prepare run: {e}"))
                .await;
            bail!("preparation failed");
        }
    };

    let filter = candidate_filter(config, ctx.job_type);
    let listing = match ctx
        .store
        .list_records(&config.establishment_id, filter.as_deref())
        .await
    {
        Ok(listing) => listing,
        Err(e) => {
            // Fatal: the record source itself is unreachable. `total`
            // stays at 0.
            ctx.log(LogLevel::Error, format!("Failed to read record set: {e}"))
                .await;
            bail!("record source unreachable");
        }
    };

    {
        let mut run = ctx.run.write().await;
        run.progress.total = listing.total_hint;
    }
    ctx.publish_progress().await;

    if listing.total_hint > 0 {
        ctx.log(
            LogLevel::Info,
            format!("Processing {} records", listing.total_hint),
        )
        .await;
    }

    let mut records = listing.records;
    let mut index: u64 = 0;
    let mut halted = false;
    while let Some(item) = records.next().await {
        // Checkpoint: a stop request takes effect here, never mid-record.
        if ctx.cancel.is_cancelled() {
            ctx.log(LogLevel::Warning, "Stop requested - halting before next record")
                .await;
            halted = true;
            break;
        }

        index += 1;
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                ctx.log(LogLevel::Error, format!("Failed to read record: {e}"))
                    .await;
                let mut run = ctx.run.write().await;
                run.progress.errors += 1;
                run.progress.processed += 1;
                drop(run);
                ctx.publish_progress().await;
                continue;
            }
        };

        let total = {
            let mut run = ctx.run.write().await;
            // The hint may be an estimate; never let it trail the records
            // actually yielded.
            if index > run.progress.total {
                run.progress.total = index;
            }
            run.current_record = Some(CurrentRecord {
                id: record.id.clone(),
                name: record.name.clone(),
                index,
                total: run.progress.total,
            });
            run.progress.total
        };
        ctx.log(LogLevel::Info, format!("[{index}/{total}] {}", record.name))
            .await;
        ctx.publish_progress().await;

        // The only intentional blocking point in the loop.
        ctx.limiter.acquire().await;

        match pipeline.process(ctx, &record).await {
            Ok(RecordOutcome::Updated) => {
                ctx.run.write().await.progress.updated += 1;
            }
            Ok(RecordOutcome::Unchanged) => {
                ctx.run.write().await.progress.unchanged += 1;
            }
            Ok(RecordOutcome::Skipped) => {
                ctx.run.write().await.progress.skipped += 1;
            }
            Err(RecordFailure::Recoverable(reason)) => {
                ctx.log(LogLevel::Error, format!("  {reason}")).await;
                ctx.run.write().await.progress.errors += 1;
            }
            Err(RecordFailure::Fatal(reason)) => bail!(reason),
        }

        {
            let mut run = ctx.run.write().await;
            run.progress.processed += 1;
        }
        ctx.publish_progress().await;
    }

    // Emptiness is decided by the stream, not the hint.
    if index == 0 && !halted {
        ctx.log(LogLevel::Warning, "No records found to process").await;
        return Ok(());
    }

    let progress = ctx.run.read().await.progress.clone();
    ctx.log(LogLevel::Info, "=== RESULT ===").await;
    ctx.log(
        LogLevel::Info,
        format!(
            "Total: {} | Processed: {} | Updated: {} | Unchanged: {} | Skipped: {} | Errors: {}",
            progress.total,
            progress.processed,
            progress.updated,
            progress.unchanged,
            progress.skipped,
            progress.errors
        ),
    )
    .await;
    ctx.log(
        LogLevel::Info,
        format!(
            "Tokens: {} | Estimated cost: ${:.4}",
            progress.tokens_used, progress.estimated_cost
        ),
    )
    .await;
    Ok(())
}

/// Which category filter the record listing should use for a run.
fn candidate_filter(config: &JobConfig, job_type: JobType) -> Option<Vec<String>> {
    match job_type {
        JobType::NameStandardizer | JobType::AutoCategorizer => {
            if config.filter_category_ids.is_empty() {
                None
            } else {
                Some(config.filter_category_ids.clone())
            }
        }
        JobType::TargetedCategorizer => {
            if config.include_others {
                // Evaluate the whole catalog; the pipeline decides
                // membership per record.
                None
            } else if !config.filter_category_ids.is_empty() {
                Some(config.filter_category_ids.clone())
            } else {
                config
                    .target_category_id
                    .as_ref()
                    .map(|id| vec![id.clone()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targeted_filter_defaults_to_target_category() {
        let config = JobConfig {
            establishment_id: "est-1".to_string(),
            target_category_id: Some("mercearia".to_string()),
            ..JobConfig::default()
        };
        assert_eq!(
            candidate_filter(&config, JobType::TargetedCategorizer),
            Some(vec!["mercearia".to_string()])
        );

        let config = JobConfig {
            filter_category_ids: vec!["conservas".to_string()],
            ..config
        };
        assert_eq!(
            candidate_filter(&config, JobType::TargetedCategorizer),
            Some(vec!["conservas".to_string()])
        );
    }

    #[test]
    fn include_others_scans_the_whole_catalog() {
        let config = JobConfig {
            establishment_id: "est-1".to_string(),
            target_category_id: Some("mercearia".to_string()),
            include_others: true,
            ..JobConfig::default()
        };
        assert_eq!(candidate_filter(&config, JobType::TargetedCategorizer), None);
    }
}
