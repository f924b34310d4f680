//! Durable record of completed work: the processed-id set and the
//! accumulated result records.
//!
//! This is the only mutable state shared across workers, and all of it
//! lives behind one lock. Mutations ([`CheckpointStore::mark_processed`],
//! [`CheckpointStore::merge_results`]) touch memory only; durability
//! happens in [`CheckpointStore::flush`], which the executor's aggregating
//! task triggers periodically and the coordinator triggers once more on
//! every exit path.
//!
//! ## Crash safety
//!
//! Each flush writes to a temporary sibling and atomically renames it over
//! the durable file, so a crash mid-write can never truncate durable state.
//! The results file is written **before** the skip-set file: if the process
//! dies between the two renames, a restart re-processes some items (safe —
//! merges deduplicate) instead of skipping items whose records were lost.
//!
//! Loading is permissive: an absent file is a first run, a corrupt file is
//! logged and degrades to empty state. Neither crashes a run.

use crate::error::{MillError, PersistError};
use crate::output::ResultRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable skip-set format.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    processed_ids: Vec<String>,
    last_updated: DateTime<Utc>,
    total_count: usize,
}

struct State {
    processed: HashSet<String>,
    records: Vec<ResultRecord>,
    /// Owning-item ids present in `records` — durable ones loaded at open
    /// plus everything merged this run.
    record_ids: HashSet<String>,
    /// Bumped on every mutation; compared against `flushed_generation` so a
    /// clean flush is a no-op and a mutation racing a flush stays dirty.
    generation: u64,
    flushed_generation: u64,
}

/// Durable set of completed-item ids plus the result accumulator.
pub struct CheckpointStore {
    checkpoint_path: PathBuf,
    results_path: PathBuf,
    state: Mutex<State>,
}

impl CheckpointStore {
    /// Open (or initialise) the store at the given paths.
    ///
    /// Creates parent directories; failure to do so is the one fatal
    /// checkpoint condition — without a writable location every flush for
    /// the rest of the run would fail.
    pub async fn open(
        checkpoint_path: impl Into<PathBuf>,
        results_path: impl Into<PathBuf>,
    ) -> Result<Self, MillError> {
        let checkpoint_path = checkpoint_path.into();
        let results_path = results_path.into();

        for path in [&checkpoint_path, &results_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|source| {
                        MillError::CheckpointUnusable {
                            path: path.clone(),
                            source,
                        }
                    })?;
                }
            }
        }

        let processed = load_processed(&checkpoint_path).await;
        let records = load_records(&results_path).await;
        let record_ids = records.iter().map(|r| r.meta.source_id.clone()).collect();
        info!(
            "checkpoint loaded: {} processed ids, {} result records",
            processed.len(),
            records.len()
        );

        Ok(Self {
            checkpoint_path,
            results_path,
            state: Mutex::new(State {
                processed,
                records,
                record_ids,
                generation: 0,
                flushed_generation: 0,
            }),
        })
    }

    /// O(1) membership test against the in-memory set.
    pub fn is_processed(&self, id: &str) -> bool {
        self.lock().processed.contains(id)
    }

    /// Record an item as fully processed. Memory-only; durability comes
    /// from the next flush.
    pub fn mark_processed(&self, id: &str) {
        let mut state = self.lock();
        if state.processed.insert(id.to_string()) {
            state.generation += 1;
        }
    }

    /// Append result records, deduplicating by owning-item id against both
    /// the durable set and records merged earlier this run. Returns how
    /// many were actually appended.
    pub fn merge_results(&self, new_records: Vec<ResultRecord>) -> usize {
        let mut state = self.lock();
        let mut appended = 0;
        for record in new_records {
            if state.record_ids.contains(&record.meta.source_id) {
                debug!(
                    "dropping duplicate result for '{}'",
                    record.meta.source_id
                );
                continue;
            }
            state.record_ids.insert(record.meta.source_id.clone());
            state.records.push(record);
            appended += 1;
        }
        if appended > 0 {
            state.generation += 1;
        }
        appended
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Durably persist the current state.
    ///
    /// Takes a snapshot under the lock, then writes without holding it, so
    /// workers are never blocked on disk I/O. If nothing changed since the
    /// last successful flush this is a no-op.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let (processed, records, generation) = {
            let state = self.lock();
            if state.generation == state.flushed_generation {
                return Ok(());
            }
            let mut ids: Vec<String> = state.processed.iter().cloned().collect();
            ids.sort();
            (ids, state.records.clone(), state.generation)
        };

        // Results first — see the module docs for why the order matters.
        let results_json =
            serde_json::to_vec_pretty(&records).map_err(|e| PersistError::Serialize {
                what: "result records",
                detail: e.to_string(),
            })?;
        write_atomic(&self.results_path, &results_json).await?;

        let checkpoint = CheckpointFile {
            total_count: processed.len(),
            processed_ids: processed,
            last_updated: Utc::now(),
        };
        let checkpoint_json =
            serde_json::to_vec_pretty(&checkpoint).map_err(|e| PersistError::Serialize {
                what: "checkpoint",
                detail: e.to_string(),
            })?;
        write_atomic(&self.checkpoint_path, &checkpoint_json).await?;

        let mut state = self.lock();
        // A mutation that landed while we were writing bumped `generation`
        // past our snapshot; it stays dirty for the next flush.
        if state.flushed_generation < generation {
            state.flushed_generation = generation;
        }
        debug!(
            "flushed checkpoint: {} ids, {} records",
            checkpoint.total_count,
            state.records.len()
        );
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("checkpoint state poisoned")
    }
}

/// Write via a temporary sibling + atomic rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn load_processed(path: &Path) -> HashSet<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<CheckpointFile>(&bytes) {
            Ok(file) => file.processed_ids.into_iter().collect(),
            Err(e) => {
                warn!(
                    "checkpoint file '{}' is malformed ({e}); starting from an empty set",
                    path.display()
                );
                HashSet::new()
            }
        },
        Err(_) => HashSet::new(),
    }
}

async fn load_records(path: &Path) -> Vec<ResultRecord> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<ResultRecord>>(&bytes) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "results file '{}' is malformed ({e}); starting from an empty accumulator",
                    path.display()
                );
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordMeta;

    fn record(id: &str) -> ResultRecord {
        ResultRecord {
            source: format!("https://store.example/{id}"),
            predictions: serde_json::json!({ "result": [] }),
            meta: RecordMeta {
                source_id: id.to_string(),
                source_name: format!("{id}.png"),
                parent_path: vec!["2024-01".into(), "001".into()],
                processed_at: Utc::now(),
            },
        }
    }

    async fn open_in(dir: &Path) -> CheckpointStore {
        CheckpointStore::open(dir.join("checkpoint.json"), dir.join("results.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn absent_files_start_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_in(tmp.path()).await;
        assert_eq!(store.processed_count(), 0);
        assert_eq!(store.record_count(), 0);
        assert!(!store.is_processed("img-1"));
    }

    #[tokio::test]
    async fn corrupt_files_degrade_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("checkpoint.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join("results.json"), "also not json").unwrap();
        let store = open_in(tmp.path()).await;
        assert_eq!(store.processed_count(), 0);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn flush_then_reopen_sees_everything() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open_in(tmp.path()).await;
            store.mark_processed("img-1");
            store.mark_processed("img-2");
            assert_eq!(store.merge_results(vec![record("img-1")]), 1);
            store.flush().await.unwrap();
        }
        let reopened = open_in(tmp.path()).await;
        assert!(reopened.is_processed("img-1"));
        assert!(reopened.is_processed("img-2"));
        assert_eq!(reopened.record_count(), 1);
    }

    #[tokio::test]
    async fn merge_dedups_against_durable_and_current_run() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open_in(tmp.path()).await;
            store.merge_results(vec![record("img-1")]);
            store.flush().await.unwrap();
        }
        let store = open_in(tmp.path()).await;
        // Durable duplicate dropped, in-run duplicate dropped, fresh kept.
        assert_eq!(
            store.merge_results(vec![record("img-1"), record("img-2"), record("img-2")]),
            1
        );
        assert_eq!(store.record_count(), 2);
    }

    #[tokio::test]
    async fn clean_flush_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_in(tmp.path()).await;
        store.mark_processed("a");
        store.flush().await.unwrap();
        let stamp1 = std::fs::metadata(tmp.path().join("checkpoint.json"))
            .unwrap()
            .modified()
            .unwrap();
        store.flush().await.unwrap();
        let stamp2 = std::fs::metadata(tmp.path().join("checkpoint.json"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(stamp1, stamp2);
    }

    #[tokio::test]
    async fn failed_flush_leaves_durable_state_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_in(tmp.path()).await;
        store.mark_processed("img-1");
        store.flush().await.unwrap();

        // Make the next flush fail by replacing the results file's parent
        // with something unwritable: point a second store at a results path
        // whose parent is a regular file.
        let blocked = tmp.path().join("checkpoint.json"); // a file, not a dir
        let bad = CheckpointStore {
            checkpoint_path: store.checkpoint_path.clone(),
            results_path: blocked.join("results.json"),
            state: Mutex::new(State {
                processed: ["img-2".to_string()].into_iter().collect(),
                records: Vec::new(),
                record_ids: HashSet::new(),
                generation: 1,
                flushed_generation: 0,
            }),
        };
        assert!(bad.flush().await.is_err());

        // The original durable checkpoint still loads with img-1 only.
        let reopened = open_in(tmp.path()).await;
        assert!(reopened.is_processed("img-1"));
        assert!(!reopened.is_processed("img-2"));
    }

    #[tokio::test]
    async fn mutation_after_flush_is_picked_up_by_the_next_one() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_in(tmp.path()).await;
        store.mark_processed("a");
        store.flush().await.unwrap();
        store.mark_processed("b");
        store.flush().await.unwrap();
        let reopened = open_in(tmp.path()).await;
        assert!(reopened.is_processed("b"));
    }
}
