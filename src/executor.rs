//! Bounded-parallel execution of the work list.
//!
//! ## Worker pool
//!
//! Items become lazy futures fed through `buffer_unordered(max_workers)` —
//! at most `max_workers` items are in flight, nothing is spawned ahead of
//! time, and a worker that blocks on network I/O or a backoff sleep never
//! stalls its siblings.
//!
//! ## Shared state discipline
//!
//! Workers touch shared state only through the checkpoint store, and only
//! once their item is fully resolved: an item is marked processed strictly
//! after every artifact it produced is confirmed written. A transform that
//! dies half-way leaves no trace in the checkpoint or the accumulator.
//!
//! The aggregation loop below is the single place that triggers periodic
//! flushes and the single listener for shutdown — workers know nothing of
//! either.

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::enumerate::WorkItem;
use crate::error::{ItemError, StoreError, TransformError};
use crate::output::{ItemResult, RecordMeta, ResultRecord, SkipReason, WorkOutcome};
use crate::progress::ProgressHandle;
use crate::store::{StoreAdapter, StoreFactory};
use crate::transform::{Artifact, Transform, TransformOutput};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Everything a worker needs, cheap to clone per item.
#[derive(Clone)]
pub struct ExecutionContext {
    pub config: PipelineConfig,
    pub factory: Arc<dyn StoreFactory>,
    pub transform: Arc<dyn Transform>,
    pub checkpoint: Arc<CheckpointStore>,
    pub progress: Option<ProgressHandle>,
    /// Folder id under which outputs mirror the source hierarchy. `None`
    /// for record-producing runs.
    pub dest_root: Option<String>,
}

/// Process the work list with bounded concurrency.
///
/// Returns every item's result plus whether the run was cut short by the
/// `shutdown` future. On shutdown, in-flight items are dropped at their
/// next await point; resolved items keep their results, and nothing
/// half-finished reaches the checkpoint.
pub async fn execute(
    items: &[WorkItem],
    ctx: &ExecutionContext,
    shutdown: impl Future<Output = ()> + Send,
) -> (Vec<ItemResult>, bool) {
    if let Some(p) = &ctx.progress {
        p.on_run_start(items.len());
    }

    let mut pool = stream::iter(
        items
            .iter()
            .map(|item| process_item(item.clone(), ctx.clone())),
    )
    .buffer_unordered(ctx.config.max_workers);

    let mut results = Vec::with_capacity(items.len());
    let mut since_flush = 0usize;
    let mut interrupted = false;
    let mut shutdown = std::pin::pin!(shutdown.fuse());

    loop {
        tokio::select! {
            next = pool.next() => match next {
                Some(result) => {
                    notify(ctx, &result);
                    results.push(result);
                    since_flush += 1;
                    if since_flush >= ctx.config.flush_interval {
                        if let Err(e) = ctx.checkpoint.flush().await {
                            warn!("periodic checkpoint flush failed (next interval retries): {e}");
                        }
                        since_flush = 0;
                    }
                }
                None => break,
            },
            _ = &mut shutdown => {
                warn!(
                    "shutdown requested; abandoning {} unresolved items",
                    items.len() - results.len()
                );
                interrupted = true;
                break;
            }
        }
    }
    drop(pool);

    if let Some(p) = &ctx.progress {
        let (mut ok, mut skip, mut fail) = (0, 0, 0);
        for r in &results {
            match r.outcome {
                WorkOutcome::Succeeded { .. } => ok += 1,
                WorkOutcome::Skipped(_) => skip += 1,
                WorkOutcome::Failed(_) => fail += 1,
            }
        }
        p.on_run_complete(ok, skip, fail);
    }

    (results, interrupted)
}

/// Resolve one work item end to end.
async fn process_item(item: WorkItem, ctx: ExecutionContext) -> ItemResult {
    let started = Instant::now();

    if ctx.checkpoint.is_processed(&item.id) {
        debug!("'{}' already checkpointed", item.name);
        return resolved(
            &item,
            WorkOutcome::Skipped(SkipReason::Checkpointed),
            0,
            started,
        );
    }

    if let Some(p) = &ctx.progress {
        p.on_item_start(&item.name);
    }

    // Per-worker handle, built from shared immutable state.
    let store = ctx.factory.adapter();

    if ctx.config.skip_existing {
        if let Some(dest_root) = &ctx.dest_root {
            match probe_destination(&store, dest_root, &item).await {
                Ok(true) => {
                    debug!("'{}': destination already populated", item.name);
                    ctx.checkpoint.mark_processed(&item.id);
                    return resolved(
                        &item,
                        WorkOutcome::Skipped(SkipReason::DestinationExists),
                        0,
                        started,
                    );
                }
                Ok(false) => {}
                // A failed probe is never fatal to the item; worst case we
                // re-process into the idempotent destination.
                Err(e) => warn!("'{}': destination probe failed ({e}); processing", item.name),
            }
        }
    }

    let bytes = match store.read(&item.id).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound { .. }) => {
            return resolved(
                &item,
                WorkOutcome::Failed(ItemError::SourceMissing {
                    name: item.name.clone(),
                }),
                0,
                started,
            );
        }
        Err(e) => {
            return resolved(
                &item,
                WorkOutcome::Failed(ItemError::ReadFailed {
                    name: item.name.clone(),
                    detail: e.to_string(),
                }),
                0,
                started,
            );
        }
    };

    let (attempts, output) = apply_with_retry(&ctx, &item, bytes).await;
    let output = match output {
        Ok(output) => output,
        Err(error) => return resolved(&item, WorkOutcome::Failed(error), attempts, started),
    };

    let outcome = match output {
        TransformOutput::Artifacts(artifacts) => {
            if artifacts.is_empty() {
                WorkOutcome::Failed(ItemError::InvalidContent {
                    name: item.name.clone(),
                    detail: "transform produced no artifacts".into(),
                })
            } else {
                let Some(dest_root) = &ctx.dest_root else {
                    return resolved(
                        &item,
                        WorkOutcome::Failed(ItemError::NoDestination {
                            name: item.name.clone(),
                        }),
                        attempts,
                        started,
                    );
                };
                match upload_artifacts(&store, dest_root, &item, &artifacts).await {
                    Ok(()) => {
                        // Every artifact is confirmed written; only now may
                        // the item enter the skip-set.
                        ctx.checkpoint.mark_processed(&item.id);
                        WorkOutcome::Succeeded {
                            artifacts: artifacts.len(),
                        }
                    }
                    Err(error) => WorkOutcome::Failed(error),
                }
            }
        }
        TransformOutput::Record {
            source,
            predictions,
        } => {
            let record = ResultRecord {
                source,
                predictions,
                meta: RecordMeta {
                    source_id: item.id.clone(),
                    source_name: item.name.clone(),
                    parent_path: item.parent_path.clone(),
                    processed_at: Utc::now(),
                },
            };
            // The record becomes durable at the same flush that persists
            // the mark, and the flush writes records first — so a restart
            // can never skip an item whose record was lost.
            ctx.checkpoint.merge_results(vec![record]);
            ctx.checkpoint.mark_processed(&item.id);
            WorkOutcome::Succeeded { artifacts: 1 }
        }
    };

    resolved(&item, outcome, attempts, started)
}

/// Invoke the transform, retrying transient failures with backoff.
/// Returns the number of invocation attempts alongside the result.
async fn apply_with_retry(
    ctx: &ExecutionContext,
    item: &WorkItem,
    bytes: Vec<u8>,
) -> (u32, Result<TransformOutput, ItemError>) {
    let max = ctx.config.max_retries;
    let mut last: Option<TransformError> = None;

    for attempt in 0..=max {
        if attempt > 0 {
            let delay = ctx.config.backoff_for_attempt(attempt);
            warn!(
                "'{}': transform retry {attempt}/{max} after {:?}",
                item.name, delay
            );
            sleep(delay).await;
        }
        match ctx.transform.apply(item, bytes.clone()).await {
            Ok(output) => return (attempt + 1, Ok(output)),
            Err(e @ TransformError::Transient { .. }) => last = Some(e),
            Err(TransformError::Invalid { detail }) => {
                return (
                    attempt + 1,
                    Err(ItemError::InvalidContent {
                        name: item.name.clone(),
                        detail,
                    }),
                );
            }
        }
    }

    let detail = last
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown transform failure".into());
    (
        max + 1,
        Err(ItemError::TransformFailed {
            name: item.name.clone(),
            attempts: max + 1,
            detail,
        }),
    )
}

/// The item's destination folder names under the run's destination root:
/// the sanitised source hierarchy, then a folder named after the item.
///
/// Artifacts therefore sit one folder level deeper than the enumerator
/// walks, so a destination root placed inside the corpus never feeds its
/// own output back into the work list.
fn destination_names(item: &WorkItem) -> Vec<String> {
    item.parent_path
        .iter()
        .map(|p| sanitize_name(p))
        .chain(std::iter::once(sanitize_name(item.stem())))
        .collect()
}

/// Does a populated destination folder for this item already exist?
///
/// Walks the folder chain without creating anything. An existing but empty
/// folder is not trusted — that is the signature of a run that died between
/// folder creation and first upload — so it reports `false` and the item is
/// re-processed into the same (idempotent) folder.
async fn probe_destination(
    store: &StoreAdapter,
    dest_root: &str,
    item: &WorkItem,
) -> Result<bool, StoreError> {
    let mut current = dest_root.to_string();
    for name in destination_names(item) {
        match store.find_folder(&name, &current).await? {
            Some(id) => current = id,
            None => return Ok(false),
        }
    }
    let children = store.list_content(&current, None).await?;
    Ok(!children.is_empty())
}

/// Create the item's destination folder chain and upload every artifact.
async fn upload_artifacts(
    store: &StoreAdapter,
    dest_root: &str,
    item: &WorkItem,
    artifacts: &[Artifact],
) -> Result<(), ItemError> {
    let mut current = dest_root.to_string();
    for name in destination_names(item) {
        current = store
            .ensure_folder(&name, &current)
            .await
            .map_err(|e| ItemError::FolderCreateFailed {
                name: item.name.clone(),
                folder: name.clone(),
                detail: e.to_string(),
            })?;
    }

    for (uploaded, artifact) in artifacts.iter().enumerate() {
        store
            .write(&artifact.bytes, &artifact.name, &current, &artifact.mime_type)
            .await
            .map_err(|e| ItemError::UploadIncomplete {
                name: item.name.clone(),
                uploaded,
                total: artifacts.len(),
                detail: e.to_string(),
            })?;
    }
    Ok(())
}

/// Keep only characters that are safe in a folder name across stores,
/// capped at 100 chars.
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let truncated: String = cleaned.trim().chars().take(100).collect();
    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated
    }
}

fn resolved(item: &WorkItem, outcome: WorkOutcome, attempts: u32, started: Instant) -> ItemResult {
    ItemResult {
        id: item.id.clone(),
        name: item.name.clone(),
        outcome,
        attempts,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn notify(ctx: &ExecutionContext, result: &ItemResult) {
    let Some(p) = &ctx.progress else { return };
    match &result.outcome {
        WorkOutcome::Skipped(_) => p.on_item_skipped(&result.name),
        WorkOutcome::Succeeded { artifacts } => p.on_item_complete(&result.name, *artifacts),
        WorkOutcome::Failed(e) => p.on_item_error(&result.name, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_name("Recibo 2024-01_v2"), "Recibo 2024-01_v2");
        assert_eq!(sanitize_name("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_name("  padded  "), "padded");
        assert_eq!(sanitize_name("///"), "unnamed");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_name(&long).chars().count(), 100);
    }

    #[test]
    fn destination_names_mirror_hierarchy_then_stem() {
        let item = WorkItem {
            id: "obj-9".into(),
            name: "scan one.pdf".into(),
            parent_path: vec!["2024-01".into(), "001".into()],
            kind: crate::store::ContentKind::Pdf,
            size: None,
        };
        assert_eq!(
            destination_names(&item),
            vec!["2024-01", "001", "scan one"]
        );
    }
}
