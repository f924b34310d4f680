//! Result and reporting types produced by a run.
//!
//! Two layers, kept deliberately separate:
//!
//! * [`ResultRecord`] is **durable** — it is what the checkpoint store
//!   accumulates on disk and what downstream tooling (annotation UIs,
//!   dataset builders) consumes.
//! * [`ItemResult`] / [`RunStats`] / [`RunReport`] are **per-run** — they
//!   describe what happened this time and are never persisted by the
//!   pipeline itself (the CLI can serialise the report on request).

use crate::error::ItemError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One durable result record, owned by exactly one work item.
///
/// A work item may yield at most one record per run; the accumulator
/// deduplicates by [`RecordMeta::source_id`] when merging, so re-processing
/// an item never duplicates its entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Stable reference to the source item, e.g. a shareable URL. Built by
    /// the transform, which knows how its store exposes content.
    pub source: String,

    /// Transform-defined payload (predictions, annotations, page listing…).
    /// Kept as raw JSON so the pipeline stays agnostic of the transform.
    pub predictions: serde_json::Value,

    pub meta: RecordMeta,
}

/// Provenance attached to every result record by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    /// The owning work item's identifier — the dedup key for merges.
    pub source_id: String,

    /// Display name of the source item.
    pub source_name: String,

    /// Ancestor folder names from enumeration, outermost first.
    pub parent_path: Vec<String>,

    pub processed_at: DateTime<Utc>,
}

/// Why an item was skipped without invoking the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The durable checkpoint set already contains the item's id.
    Checkpointed,
    /// `skip_existing` probe found a non-empty destination folder.
    DestinationExists,
}

/// What happened to one work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkOutcome {
    Skipped(SkipReason),
    Succeeded {
        /// Artifacts uploaded, or 1 for a merged result record.
        artifacts: usize,
    },
    Failed(ItemError),
}

impl WorkOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, WorkOutcome::Skipped(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, WorkOutcome::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkOutcome::Failed(_))
    }
}

/// Per-item execution record returned by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub name: String,
    pub outcome: WorkOutcome,
    /// Transform invocations for this item (0 when skipped or failed
    /// before the transform ran).
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Run-level counters, assembled on the aggregating task only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub enumerated: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub artifacts_produced: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl RunStats {
    /// Fold a set of item results into counters.
    pub fn from_results(
        enumerated: usize,
        results: &[ItemResult],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self {
            enumerated,
            skipped: 0,
            succeeded: 0,
            failed: 0,
            artifacts_produced: 0,
            started_at,
            finished_at,
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        };
        for r in results {
            match &r.outcome {
                WorkOutcome::Skipped(_) => stats.skipped += 1,
                WorkOutcome::Succeeded { artifacts } => {
                    stats.succeeded += 1;
                    stats.artifacts_produced += artifacts;
                }
                WorkOutcome::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// A failed item as listed in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub name: String,
    pub reason: String,
}

/// The full summary handed back by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stats: RunStats,
    /// Names and reasons for every failed item, in completion order.
    pub failures: Vec<ItemFailure>,
    /// True when the run was stopped by an external shutdown signal before
    /// the work list was drained.
    pub interrupted: bool,
}

impl RunReport {
    pub fn assemble(
        enumerated: usize,
        results: &[ItemResult],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        interrupted: bool,
    ) -> Self {
        let failures = results
            .iter()
            .filter_map(|r| match &r.outcome {
                WorkOutcome::Failed(e) => Some(ItemFailure {
                    name: r.name.clone(),
                    reason: e.to_string(),
                }),
                _ => None,
            })
            .collect();
        Self {
            stats: RunStats::from_results(enumerated, results, started_at, finished_at),
            failures,
            interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: WorkOutcome) -> ItemResult {
        ItemResult {
            id: format!("id-{name}"),
            name: name.to_string(),
            outcome,
            attempts: 1,
            duration_ms: 5,
        }
    }

    #[test]
    fn stats_fold_counts_each_category() {
        let results = vec![
            result("a", WorkOutcome::Skipped(SkipReason::Checkpointed)),
            result("b", WorkOutcome::Succeeded { artifacts: 3 }),
            result("c", WorkOutcome::Succeeded { artifacts: 1 }),
            result(
                "d",
                WorkOutcome::Failed(ItemError::SourceMissing { name: "d".into() }),
            ),
        ];
        let now = Utc::now();
        let stats = RunStats::from_results(4, &results, now, now);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.artifacts_produced, 4);
        assert_eq!(stats.enumerated, 4);
    }

    #[test]
    fn report_lists_failures_with_reasons() {
        let results = vec![
            result("ok", WorkOutcome::Succeeded { artifacts: 1 }),
            result(
                "bad",
                WorkOutcome::Failed(ItemError::InvalidContent {
                    name: "bad".into(),
                    detail: "produced no artifacts".into(),
                }),
            ),
        ];
        let now = Utc::now();
        let report = RunReport::assemble(2, &results, now, now, false);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "bad");
        assert!(report.failures[0].reason.contains("no artifacts"));
        assert!(!report.interrupted);
    }

    #[test]
    fn report_serialises_to_json() {
        let now = Utc::now();
        let report = RunReport::assemble(0, &[], now, now, true);
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"interrupted\": true"));
    }
}
