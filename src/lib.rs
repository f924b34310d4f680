//! # docmill
//!
//! Idempotent, checkpointed batch conversion for remote document stores.
//!
//! ## Why this crate?
//!
//! Converting a growing remote corpus (folders of PDFs and scans) is easy
//! to start and miserable to finish: processes crash mid-upload, APIs
//! rate-limit, and naive re-runs either redo days of work or duplicate
//! output. docmill treats re-runnability as the core feature — a durable
//! skip-set decides what remains, a bounded worker pool does the work, and
//! incremental flushes guarantee a restart picks up where the last run
//! verifiably finished.
//!
//! ## Pipeline Overview
//!
//! ```text
//! corpus root
//!  │
//!  ├─ 1. Enumerate  walk period/batch folders into a flat work list
//!  ├─ 2. Skip       drop items already in the durable checkpoint set
//!  ├─ 3. Execute    bounded worker pool; read → transform → upload/merge
//!  │                (transient failures retried with exponential backoff)
//!  ├─ 4. Mark       checkpoint an item only after ALL its output is durable
//!  ├─ 5. Flush      atomically persist skip-set + results every N items
//!  └─ 6. Report     per-outcome counts and failed-item reasons
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmill::{
//!     CheckpointStore, ContentKind, MirrorTransform, Pipeline, PipelineConfig,
//!     RunRequest, SharedBackendFactory,
//! };
//! use docmill::store::local::LocalDirStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let checkpoint =
//!         CheckpointStore::open(&config.checkpoint_path, &config.results_path).await?;
//!     let backend = Arc::new(LocalDirStore::new("./corpus"));
//!     let factory = Arc::new(SharedBackendFactory::new(backend, &config));
//!
//!     let pipeline = Pipeline::new(
//!         config,
//!         factory,
//!         Arc::new(MirrorTransform),
//!         Arc::new(checkpoint),
//!     );
//!     let report = pipeline
//!         .run(&RunRequest {
//!             root_id: String::new(),
//!             kind: ContentKind::Pdf,
//!             dest_folder: Some("converted".into()),
//!         })
//!         .await?;
//!     println!(
//!         "{} succeeded, {} skipped, {} failed",
//!         report.stats.succeeded, report.stats.skipped, report.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! * **Idempotence** — a second run over an unchanged corpus performs zero
//!   transform invocations.
//! * **No partial marking** — an item whose upload dies half-way is absent
//!   from the checkpoint and retried next run; folder creation is
//!   idempotent so the retry reuses (never duplicates) its destination.
//! * **Crash safety** — flushes replace durable files atomically; whatever
//!   the last completed flush saw is exactly what a restart loads.
//! * **Dedup on merge** — re-processing an item never duplicates its entry
//!   in the accumulated result set.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmill` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docmill = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod executor;
pub mod output;
pub mod progress;
pub mod run;
pub mod store;
pub mod transform;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::CheckpointStore;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use enumerate::WorkItem;
pub use error::{ItemError, MillError, PersistError, StoreError, TransformError};
pub use output::{
    ItemFailure, ItemResult, RecordMeta, ResultRecord, RunReport, RunStats, SkipReason,
    WorkOutcome,
};
pub use progress::{NoopProgress, PipelineProgress, ProgressHandle};
pub use run::{Pipeline, RunPhase, RunPlan, RunRequest};
pub use store::{
    ContentKind, RemoteBackend, SharedBackendFactory, StoreAdapter, StoreFactory,
};
pub use transform::{Artifact, MirrorTransform, Transform, TransformOutput};
