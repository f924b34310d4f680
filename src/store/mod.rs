//! Remote store seam: the raw backend trait and the adapter that makes it
//! pleasant to use.
//!
//! The split matters:
//!
//! * [`RemoteBackend`] is the **wire-shaped** interface — paged listings,
//!   single-shot reads/writes, find-vs-create folder primitives. Backends
//!   implement exactly what their protocol offers and nothing more. The
//!   crate ships two: [`memory::MemoryStore`] (fixtures, failure injection)
//!   and [`local::LocalDirStore`] (a directory tree). Real remote protocols
//!   live outside this crate.
//!
//! * [`StoreAdapter`] wraps a backend with the behaviour every caller
//!   wants: transparent pagination until exhaustion, retry with exponential
//!   backoff on transient failures, idempotent folder creation, and a
//!   per-handle folder-id cache that spares redundant existence lookups.
//!
//! Workers never share an adapter. A [`StoreFactory`] hands each worker its
//! own handle built from shared immutable state, so no mutable session
//! state crosses worker boundaries.

pub mod local;
pub mod memory;

use crate::config::PipelineConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// The kind of leaf content a listing can filter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Pdf,
    Image,
}

impl ContentKind {
    /// Infer the kind from a file name's extension.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(ContentKind::Pdf),
            "png" | "jpg" | "jpeg" => Some(ContentKind::Image),
            _ => None,
        }
    }

    /// The MIME type used when writing artifacts of this kind.
    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "application/pdf",
            ContentKind::Image => "image/png",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Pdf => write!(f, "pdf"),
            ContentKind::Image => write!(f, "image"),
        }
    }
}

/// A folder as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
}

/// A leaf content entry as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
}

/// One page of a listing, with an opaque continuation token.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    pub entries: Vec<T>,
    /// `None` when this was the last page.
    pub next_page: Option<String>,
}

impl<T> ListPage<T> {
    /// A single page holding everything (for backends without pagination).
    pub fn complete(entries: Vec<T>) -> Self {
        Self {
            entries,
            next_page: None,
        }
    }
}

/// Raw operations a remote document store must offer.
///
/// All methods may fail with [`StoreError::Transient`]; callers go through
/// [`StoreAdapter`], which retries those. `find_folder` reports absence as
/// `Ok(None)` — existence checks are expected branching, not errors.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// List child folders of `parent_id`, one page at a time.
    async fn list_folders(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage<FolderEntry>, StoreError>;

    /// List leaf content under `parent_id`, optionally filtered by kind.
    async fn list_content(
        &self,
        parent_id: &str,
        kind: Option<ContentKind>,
        page_token: Option<&str>,
    ) -> Result<ListPage<ContentEntry>, StoreError>;

    /// Read the full content of an object.
    async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `bytes` as a new object under `parent_id`, returning its id.
    async fn write(
        &self,
        bytes: &[u8],
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String, StoreError>;

    /// Look up a child folder by name. `Ok(None)` when absent.
    async fn find_folder(&self, name: &str, parent_id: &str)
        -> Result<Option<String>, StoreError>;

    /// Create a child folder and return its id. Callers use
    /// [`StoreAdapter::ensure_folder`], which checks existence first.
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError>;
}

/// How the adapter retries transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Backoff before retry `attempt` (1-indexed): `base * 2^(attempt-1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run `op` up to `1 + max_retries` times, sleeping between attempts.
/// Only transient errors are retried; everything else surfaces immediately.
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut last: Option<StoreError> = None;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            debug!("{what}: retry {attempt}/{} after {:?}", policy.max_retries, backoff);
            sleep(backoff).await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                warn!("{what}: attempt {} failed — {e}", attempt + 1);
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(StoreError::Transient {
        detail: "retries exhausted".into(),
    }))
}

/// A worker's handle onto the remote store.
///
/// Cheap to construct; each handle owns its own folder cache, so handles
/// never contend with each other and can be created per worker (or per
/// item) without coordination.
pub struct StoreAdapter {
    backend: Arc<dyn RemoteBackend>,
    retry: RetryPolicy,
    folder_cache: Mutex<HashMap<(String, String), String>>,
}

impl StoreAdapter {
    pub fn new(backend: Arc<dyn RemoteBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            folder_cache: Mutex::new(HashMap::new()),
        }
    }

    /// List all child folders, following pagination until exhausted.
    pub async fn list_folders(&self, parent_id: &str) -> Result<Vec<FolderEntry>, StoreError> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry(&self.retry, "list_folders", || {
                self.backend.list_folders(parent_id, token.as_deref())
            })
            .await?;
            all.extend(page.entries);
            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(all)
    }

    /// List all leaf content, following pagination until exhausted.
    pub async fn list_content(
        &self,
        parent_id: &str,
        kind: Option<ContentKind>,
    ) -> Result<Vec<ContentEntry>, StoreError> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry(&self.retry, "list_content", || {
                self.backend.list_content(parent_id, kind, token.as_deref())
            })
            .await?;
            all.extend(page.entries);
            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(all)
    }

    /// Read an object's bytes, retrying transient failures.
    pub async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        with_retry(&self.retry, "read", || self.backend.read(id)).await
    }

    /// Write an object, retrying transient failures.
    ///
    /// Retries assume the backend deduplicates by name within a folder or
    /// that the destination folder is private to this item; both hold for
    /// the idempotent destination layout the executor builds.
    pub async fn write(
        &self,
        bytes: &[u8],
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String, StoreError> {
        with_retry(&self.retry, "write", || {
            self.backend.write(bytes, name, parent_id, mime_type)
        })
        .await
    }

    /// Look up a child folder by name without creating it. Consults the
    /// cache first; caches a hit.
    pub async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, StoreError> {
        if let Some(id) = self.cached(parent_id, name) {
            return Ok(Some(id));
        }
        let found = with_retry(&self.retry, "find_folder", || {
            self.backend.find_folder(name, parent_id)
        })
        .await?;
        if let Some(ref id) = found {
            self.cache(parent_id, name, id);
        }
        Ok(found)
    }

    /// Return the id of the named child folder, creating it if absent.
    ///
    /// Idempotent: a folder that already exists is returned, never
    /// duplicated. This is what makes whole-item retries after a partial
    /// upload safe — the re-run lands in the same folder.
    pub async fn ensure_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError> {
        if let Some(id) = self.find_folder(name, parent_id).await? {
            return Ok(id);
        }
        let id = with_retry(&self.retry, "create_folder", || {
            self.backend.create_folder(name, parent_id)
        })
        .await?;
        self.cache(parent_id, name, &id);
        Ok(id)
    }

    fn cached(&self, parent_id: &str, name: &str) -> Option<String> {
        self.folder_cache
            .lock()
            .expect("folder cache poisoned")
            .get(&(parent_id.to_string(), name.to_string()))
            .cloned()
    }

    fn cache(&self, parent_id: &str, name: &str, id: &str) {
        self.folder_cache
            .lock()
            .expect("folder cache poisoned")
            .insert((parent_id.to_string(), name.to_string()), id.to_string());
    }
}

/// Hands each worker its own independently constructed store handle.
///
/// Implementations hold only immutable shared state (credentials, base
/// URLs, an `Arc` to a thread-safe backend); nothing mutable crosses
/// worker boundaries through the factory.
pub trait StoreFactory: Send + Sync {
    fn adapter(&self) -> StoreAdapter;
}

/// The common case: one thread-safe backend shared by reference, a fresh
/// adapter (with its own folder cache) per worker.
pub struct SharedBackendFactory {
    backend: Arc<dyn RemoteBackend>,
    retry: RetryPolicy,
}

impl SharedBackendFactory {
    pub fn new(backend: Arc<dyn RemoteBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl StoreFactory for SharedBackendFactory {
    fn adapter(&self) -> StoreAdapter {
        StoreAdapter::new(Arc::clone(&self.backend), self.retry)
    }
}
