//! Error types for the docmill library.
//!
//! The taxonomy mirrors how failures propagate through the pipeline:
//!
//! * [`MillError`] — **Fatal**: the run cannot proceed at all (unreachable
//!   corpus root, unusable checkpoint store, invalid configuration).
//!   Returned as `Err(MillError)` from [`crate::run::Pipeline::run`].
//!
//! * [`ItemError`] — **Non-fatal**: a single work item failed (source gone,
//!   transform rejected it, an upload died mid-way). Stored inside
//!   [`crate::output::ItemResult`] so callers inspect partial success rather
//!   than losing the whole run to one bad document.
//!
//! * [`StoreError`] — remote-store operations, split into transient failures
//!   (retried with backoff by the adapter) and not-found (terminal).
//!
//! * [`TransformError`] — the transform seam, with the same transient vs
//!   terminal split.
//!
//! * [`PersistError`] — checkpoint flush failures. Reported to the
//!   coordinator as a durability warning; the run continues and the next
//!   successful flush self-heals.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a run.
///
/// Per-item failures use [`ItemError`] and are stored in
/// [`crate::output::ItemResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum MillError {
    /// The corpus root could not be listed. Nothing can be enumerated.
    #[error("corpus root '{id}' could not be listed: {detail}\nCheck the root id and store credentials.")]
    RootNotFound { id: String, detail: String },

    /// The destination root folder could not be created or found.
    #[error("destination folder '{name}' is unavailable: {detail}")]
    DestinationUnavailable { name: String, detail: String },

    /// The checkpoint store's backing directory cannot be used at all.
    #[error("checkpoint store at '{path}' is unusable: {source}")]
    CheckpointUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from a single remote-store operation.
///
/// The adapter retries `Transient` with exponential backoff; `NotFound` is
/// terminal for the operation and surfaces immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network blip, rate limit, 5xx — worth retrying.
    #[error("transient store failure: {detail}")]
    Transient { detail: String },

    /// The referenced object does not exist on the remote.
    #[error("remote object not found: {id}")]
    NotFound { id: String },
}

impl StoreError {
    /// Whether the adapter's retry wrapper should try this operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Errors from the transform seam.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The transform hit a transient condition (e.g. a backend it calls was
    /// overloaded) and the same input may succeed on retry.
    #[error("transient transform failure: {detail}")]
    Transient { detail: String },

    /// The input is structurally unusable; retrying cannot help.
    #[error("invalid content: {detail}")]
    Invalid { detail: String },
}

impl TransformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransformError::Transient { .. })
    }
}

/// A non-fatal error for a single work item.
///
/// Recorded in the item's [`crate::output::WorkOutcome::Failed`] and listed
/// by name in the final report. The item is never marked processed, so a
/// later run retries it from scratch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The source bytes could not be read after all retries.
    #[error("'{name}': read failed after retries: {detail}")]
    ReadFailed { name: String, detail: String },

    /// The source disappeared between enumeration and processing.
    #[error("'{name}': source no longer exists")]
    SourceMissing { name: String },

    /// The transform gave up after exhausting retries on transient failures.
    #[error("'{name}': transform failed after {attempts} attempts: {detail}")]
    TransformFailed {
        name: String,
        attempts: u32,
        detail: String,
    },

    /// The transform rejected the content outright, or produced nothing.
    #[error("'{name}': {detail}")]
    InvalidContent { name: String, detail: String },

    /// A destination folder in the upload chain could not be created.
    #[error("'{name}': destination folder '{folder}' could not be created: {detail}")]
    FolderCreateFailed {
        name: String,
        folder: String,
        detail: String,
    },

    /// Some artifacts uploaded, then one failed. The item stays unmarked so
    /// the whole item is retried; folder idempotence makes the retry safe.
    #[error("'{name}': only {uploaded}/{total} artifacts uploaded: {detail}")]
    UploadIncomplete {
        name: String,
        uploaded: usize,
        total: usize,
        detail: String,
    },

    /// The transform produced artifacts but the run has no destination.
    #[error("'{name}': transform produced artifacts but no destination folder is configured")]
    NoDestination { name: String },
}

/// A checkpoint flush failure.
///
/// Previously-durable state is intact (flushes replace files atomically);
/// the in-memory state still holds everything, so a later flush retries the
/// full write.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to serialise {what}: {detail}")]
    Serialize { what: &'static str, detail: String },

    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
