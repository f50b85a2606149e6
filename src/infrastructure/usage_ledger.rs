//! Durable daily usage ledger
//!
//! Append/merge counter of classification token consumption and estimated
//! cost, keyed by calendar day. Multiple job workers record into it
//! concurrently, so the whole read-modify-write-persist cycle runs under a
//! single mutex, and persistence replaces the file atomically
//! (write-temp-then-rename) so a crash never corrupts committed state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::usage::DailyUsage;

/// gpt-4o-mini pricing, USD per token.
pub const INPUT_TOKEN_COST: f64 = 0.000_15 / 1000.0;
pub const OUTPUT_TOKEN_COST: f64 = 0.000_60 / 1000.0;

/// Cost of one call, derived from token counts. The ledger's cost column
/// is only ever computed through this function.
#[must_use]
pub fn estimate_cost(tokens_input: u64, tokens_output: u64) -> f64 {
    tokens_input as f64 * INPUT_TOKEN_COST + tokens_output as f64 * OUTPUT_TOKEN_COST
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to load usage ledger from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DayTotals {
    tokens: u64,
    cost: f64,
    calls: u64,
}

#[derive(Debug)]
struct LedgerInner {
    path: PathBuf,
    entries: BTreeMap<String, DayTotals>,
}

/// Thread-safe daily usage ledger persisted as a single JSON file mapping
/// ISO dates to `{tokens, cost, calls}`.
#[derive(Debug)]
pub struct UsageLedger {
    inner: Mutex<LedgerInner>,
}

impl UsageLedger {
    /// Open the ledger at `path`, loading any existing history. A missing
    /// file starts an empty ledger. A corrupted file is moved aside to
    /// `.json.corrupted` and replaced with an empty ledger, so startup
    /// proceeds and the unparseable history stays recoverable. An
    /// unreadable file is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "usage ledger corrupted, backing up and starting empty"
                    );
                    let backup_path = path.with_extension("json.corrupted");
                    if let Err(backup_err) = tokio::fs::rename(&path, &backup_path).await {
                        warn!(error = %backup_err, "failed to back up corrupted ledger");
                    }
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(LedgerError::LoadFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self {
            inner: Mutex::new(LedgerInner { path, entries }),
        })
    }

    /// Merge one completed call into today's entry and persist the whole
    /// ledger. A persist failure is logged and does not lose the update:
    /// counters stay in memory and the next successful persist carries the
    /// backlog.
    pub async fn record(&self, tokens_input: u64, tokens_output: u64) -> DailyUsage {
        let call_cost = estimate_cost(tokens_input, tokens_output);
        let date = today_key();

        let mut inner = self.inner.lock().await;
        let entry = inner.entries.entry(date.clone()).or_default();
        entry.tokens += tokens_input + tokens_output;
        entry.cost += call_cost;
        entry.calls += 1;
        let snapshot = DailyUsage {
            date,
            tokens: entry.tokens,
            cost: entry.cost,
            calls: entry.calls,
        };

        if let Err(e) = persist(&inner.path, &inner.entries).await {
            warn!(path = %inner.path.display(), error = %e, "failed to persist usage ledger");
        }
        snapshot
    }

    /// Today's entry, zeroed if nothing was recorded yet.
    pub async fn today(&self) -> DailyUsage {
        let date = today_key();
        let inner = self.inner.lock().await;
        let totals = inner.entries.get(&date).cloned().unwrap_or_default();
        DailyUsage {
            date,
            tokens: totals.tokens,
            cost: totals.cost,
            calls: totals.calls,
        }
    }

    /// Full history, date to entry.
    pub async fn all(&self) -> BTreeMap<String, DailyUsage> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(date, totals)| {
                (
                    date.clone(),
                    DailyUsage {
                        date: date.clone(),
                        tokens: totals.tokens,
                        cost: totals.cost,
                        calls: totals.calls,
                    },
                )
            })
            .collect()
    }
}

fn today_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Atomic replace: serialize to a sibling temp file, then rename over the
/// target.
async fn persist(path: &Path, entries: &BTreeMap<String, DayTotals>) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create ledger directory")?;
        }
    }
    let content =
        serde_json::to_vec_pretty(entries).context("failed to serialize usage ledger")?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .context("failed to write ledger temp file")?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .context("failed to replace ledger file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_accumulates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily_stats.json");

        let ledger = UsageLedger::open(&path).await.unwrap();
        let first = ledger.record(100, 20).await;
        assert_eq!(first.tokens, 120);
        assert_eq!(first.calls, 1);

        let second = ledger.record(50, 10).await;
        assert_eq!(second.tokens, 180);
        assert_eq!(second.calls, 2);
        let expected_cost = estimate_cost(100, 20) + estimate_cost(50, 10);
        assert!((second.cost - expected_cost).abs() < 1e-12);

        // Reopen from disk; history must survive.
        drop(ledger);
        let reopened = UsageLedger::open(&path).await.unwrap();
        let today = reopened.today().await;
        assert_eq!(today.tokens, 180);
        assert_eq!(today.calls, 2);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::open(dir.path().join("nope.json")).await.unwrap();
        let today = ledger.today().await;
        assert_eq!(today.tokens, 0);
        assert_eq!(today.calls, 0);
        assert!(ledger.all().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily_stats.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let ledger = UsageLedger::open(&path).await.unwrap();
        assert!(ledger.all().await.is_empty());
        assert!(path.with_extension("json.corrupted").exists());

        // The reset ledger accumulates and persists normally.
        ledger.record(10, 5).await;
        assert_eq!(ledger.today().await.calls, 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily_stats.json");
        let ledger = UsageLedger::open(&path).await.unwrap();
        ledger.record(10, 5).await;
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
