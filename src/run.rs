//! Run coordination: enumerate, execute, flush, report.
//!
//! A run moves through `Enumerating → Executing → Flushing`; per-item
//! failures never leave `Executing`, and `Flushing` happens on **every**
//! path out of `Executing` — normal completion and external shutdown alike
//! — so completed work is never lost to an interrupt. Only three things
//! are fatal: an unlistable root, an unusable checkpoint location, and an
//! unreachable destination root.

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::enumerate::{self, WorkItem};
use crate::error::MillError;
use crate::executor::{self, ExecutionContext};
use crate::output::RunReport;
use crate::progress::ProgressHandle;
use crate::store::{ContentKind, StoreFactory};
use crate::transform::Transform;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Phases of a run, used for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Enumerating,
    Executing,
    Flushing,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Enumerating => write!(f, "enumerating"),
            RunPhase::Executing => write!(f, "executing"),
            RunPhase::Flushing => write!(f, "flushing"),
        }
    }
}

/// What to run over: which corpus root, which content kind, and where
/// artifact output goes.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Id of the corpus root folder in the store.
    pub root_id: String,
    /// Which leaf content to enumerate.
    pub kind: ContentKind,
    /// Name of the destination folder ensured under the root. Required for
    /// artifact-producing transforms; `None` for record-producing runs.
    pub dest_folder: Option<String>,
}

/// Enumeration result partitioned against the checkpoint, without
/// executing anything.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub total: usize,
    pub already_processed: usize,
    /// Items a run would actually process, in enumeration order.
    pub pending: Vec<WorkItem>,
}

/// Owns a run's collaborators and drives the phases.
pub struct Pipeline {
    config: PipelineConfig,
    factory: Arc<dyn StoreFactory>,
    transform: Arc<dyn Transform>,
    checkpoint: Arc<CheckpointStore>,
    progress: Option<ProgressHandle>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn StoreFactory>,
        transform: Arc<dyn Transform>,
        checkpoint: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            config,
            factory,
            transform,
            checkpoint,
            progress: None,
        }
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Run to completion (no external shutdown signal).
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, MillError> {
        self.run_until(request, std::future::pending()).await
    }

    /// Run until the work list drains or `shutdown` resolves.
    ///
    /// On shutdown, in-flight items are abandoned, resolved outcomes are
    /// kept, and the final flush still happens before this returns.
    pub async fn run_until(
        &self,
        request: &RunRequest,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<RunReport, MillError> {
        let started_at = Utc::now();
        info!(
            phase = %RunPhase::Enumerating,
            root = %request.root_id,
            kind = %request.kind,
            transform = self.transform.label(),
            "starting run"
        );

        let adapter = self.factory.adapter();
        let items = enumerate::enumerate(&adapter, &request.root_id, request.kind).await?;
        info!(phase = %RunPhase::Enumerating, "work list holds {} items", items.len());

        let dest_root = match &request.dest_folder {
            Some(name) => Some(adapter.ensure_folder(name, &request.root_id).await.map_err(
                |e| MillError::DestinationUnavailable {
                    name: name.clone(),
                    detail: e.to_string(),
                },
            )?),
            None => None,
        };

        info!(phase = %RunPhase::Executing, workers = self.config.max_workers, "processing");
        let ctx = ExecutionContext {
            config: self.config.clone(),
            factory: Arc::clone(&self.factory),
            transform: Arc::clone(&self.transform),
            checkpoint: Arc::clone(&self.checkpoint),
            progress: self.progress.clone(),
            dest_root,
        };
        let (results, interrupted) = executor::execute(&items, &ctx, shutdown).await;

        // Every path out of Executing ends here, interrupted or not.
        info!(phase = %RunPhase::Flushing, "persisting checkpoint");
        if let Err(e) = self.checkpoint.flush().await {
            warn!("final checkpoint flush failed: {e}");
        }

        let report = RunReport::assemble(items.len(), &results, started_at, Utc::now(), interrupted);
        info!(
            "run finished: {} enumerated, {} skipped, {} succeeded, {} failed, {} artifacts, {:.1}s",
            report.stats.enumerated,
            report.stats.skipped,
            report.stats.succeeded,
            report.stats.failed,
            report.stats.artifacts_produced,
            report.stats.duration_seconds,
        );
        Ok(report)
    }

    /// Enumerate and partition against the checkpoint without processing.
    pub async fn plan(&self, request: &RunRequest) -> Result<RunPlan, MillError> {
        let adapter = self.factory.adapter();
        let items = enumerate::enumerate(&adapter, &request.root_id, request.kind).await?;
        let total = items.len();
        let pending: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| !self.checkpoint.is_processed(&item.id))
            .collect();
        Ok(RunPlan {
            total,
            already_processed: total - pending.len(),
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::SharedBackendFactory;
    use crate::transform::MirrorTransform;

    async fn pipeline_over(store: Arc<MemoryStore>, dir: &std::path::Path) -> Pipeline {
        let config = PipelineConfig::builder()
            .retry_base_delay_ms(1)
            .checkpoint_path(dir.join("checkpoint.json"))
            .results_path(dir.join("results.json"))
            .build()
            .unwrap();
        let checkpoint = CheckpointStore::open(&config.checkpoint_path, &config.results_path)
            .await
            .unwrap();
        let factory = Arc::new(SharedBackendFactory::new(store, &config));
        Pipeline::new(
            config,
            factory,
            Arc::new(MirrorTransform),
            Arc::new(checkpoint),
        )
    }

    #[tokio::test]
    async fn plan_partitions_by_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let month = store.add_folder(MemoryStore::ROOT, "2024-01");
        let batch = store.add_folder(&month, "001");
        let done = store.add_file(&batch, "a.png", vec![1]);
        store.add_file(&batch, "b.png", vec![2]);

        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline_over(store, tmp.path()).await;
        pipeline.checkpoint().mark_processed(&done);

        let plan = pipeline
            .plan(&RunRequest {
                root_id: MemoryStore::ROOT.into(),
                kind: ContentKind::Image,
                dest_folder: None,
            })
            .await
            .unwrap();
        assert_eq!(plan.total, 2);
        assert_eq!(plan.already_processed, 1);
        assert_eq!(plan.pending.len(), 1);
        assert_eq!(plan.pending[0].name, "b.png");
    }

    #[tokio::test]
    async fn missing_root_fails_before_any_work() {
        let store = Arc::new(MemoryStore::new());
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline_over(store, tmp.path()).await;
        let err = pipeline
            .run(&RunRequest {
                root_id: "bogus".into(),
                kind: ContentKind::Pdf,
                dest_folder: Some("out".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::RootNotFound { .. }));
    }
}
