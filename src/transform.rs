//! The transform seam: how one work item becomes output.
//!
//! The pipeline never looks inside a transform — rendering engines, OCR
//! models, and their tuning all live behind this trait, exactly like the
//! store protocol lives behind [`crate::store::RemoteBackend`]. What the
//! pipeline does care about is the *shape* of the output:
//!
//! * [`TransformOutput::Artifacts`] — conversion-style: files to upload
//!   into the item's destination folder (e.g. one image per page).
//! * [`TransformOutput::Record`] — annotation-style: one JSON payload to
//!   merge into the durable result accumulator.
//!
//! Transform failures carry the same transient/terminal split as store
//! failures; the executor retries transient ones with backoff.

use crate::enumerate::WorkItem;
use crate::error::TransformError;
use async_trait::async_trait;

/// One output file produced from a work item.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// File name within the item's destination folder, e.g. `scan_p3.png`.
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// What a transform produced for one item.
#[derive(Debug, Clone)]
pub enum TransformOutput {
    /// Files to upload. Must be non-empty; an item that converts to
    /// nothing is a validation failure, not a success with zero output.
    Artifacts(Vec<Artifact>),

    /// One result record to merge into the accumulator. `source` is a
    /// stable reference to the item (the transform knows how its store
    /// exposes content, e.g. a shareable URL); the executor attaches
    /// provenance metadata.
    Record {
        source: String,
        predictions: serde_json::Value,
    },
}

/// Converts one work item into output. Implementations must be cheap to
/// share (`Arc`) and safe to call concurrently.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Short name used in logs and reports.
    fn label(&self) -> &str;

    async fn apply(&self, item: &WorkItem, bytes: Vec<u8>)
        -> Result<TransformOutput, TransformError>;
}

/// The built-in reference transform: mirrors each source document into its
/// destination folder unchanged.
///
/// Useful for smoke-testing store access, destination layout, and the
/// checkpoint/skip machinery before wiring in a real converter.
pub struct MirrorTransform;

#[async_trait]
impl Transform for MirrorTransform {
    fn label(&self) -> &str {
        "mirror"
    }

    async fn apply(
        &self,
        item: &WorkItem,
        bytes: Vec<u8>,
    ) -> Result<TransformOutput, TransformError> {
        if bytes.is_empty() {
            return Err(TransformError::Invalid {
                detail: "source is empty".into(),
            });
        }
        Ok(TransformOutput::Artifacts(vec![Artifact {
            name: item.name.clone(),
            mime_type: item.kind.mime().to_string(),
            bytes,
        }]))
    }
}
