//! In-memory store backend for tests and examples.
//!
//! Behaves like a small remote file store: paged listings (page size is
//! configurable so pagination-following is actually exercised), folders and
//! leaf objects with ids distinct from names, and scriptable transient
//! failures per object so retry paths can be driven deterministically.

use super::{ContentEntry, ContentKind, FolderEntry, ListPage, RemoteBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FolderNode {
    name: String,
    parent: String,
}

#[derive(Debug, Clone)]
struct FileNode {
    name: String,
    parent: String,
    bytes: Vec<u8>,
    kind: Option<ContentKind>,
}

#[derive(Default)]
struct Inner {
    folders: HashMap<String, FolderNode>,
    files: HashMap<String, FileNode>,
    seq: u64,
    /// Remaining transient failures, keyed by object id (reads) or by
    /// object name (writes) or folder id (listings).
    fail_reads: HashMap<String, u32>,
    fail_writes: HashMap<String, u32>,
    fail_lists: HashMap<String, u32>,
}

/// A scriptable in-memory [`RemoteBackend`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
    find_folder_calls: AtomicUsize,
    write_count: AtomicUsize,
}

impl MemoryStore {
    /// The id of the implicit root folder.
    pub const ROOT: &'static str = "root";

    pub fn new() -> Self {
        Self::with_page_size(usize::MAX)
    }

    /// A store whose listings return at most `page_size` entries per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: page_size.max(1),
            find_folder_calls: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    // ── Fixture construction ─────────────────────────────────────────────

    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        let mut inner = self.lock();
        inner.seq += 1;
        let id = format!("dir-{}", inner.seq);
        inner.folders.insert(
            id.clone(),
            FolderNode {
                name: name.to_string(),
                parent: parent.to_string(),
            },
        );
        id
    }

    pub fn add_file(&self, parent: &str, name: &str, bytes: Vec<u8>) -> String {
        let mut inner = self.lock();
        inner.seq += 1;
        let id = format!("obj-{}", inner.seq);
        inner.files.insert(
            id.clone(),
            FileNode {
                name: name.to_string(),
                parent: parent.to_string(),
                bytes,
                kind: ContentKind::from_name(name),
            },
        );
        id
    }

    // ── Failure injection ────────────────────────────────────────────────

    /// The next `n` reads of `id` fail with a transient error.
    pub fn fail_reads(&self, id: &str, n: u32) {
        self.lock().fail_reads.insert(id.to_string(), n);
    }

    /// The next `n` writes of an object named `name` fail transiently.
    pub fn fail_writes_named(&self, name: &str, n: u32) {
        self.lock().fail_writes.insert(name.to_string(), n);
    }

    /// The next `n` listings of `folder_id` fail transiently.
    pub fn fail_listings(&self, folder_id: &str, n: u32) {
        self.lock().fail_lists.insert(folder_id.to_string(), n);
    }

    // ── Assertion helpers ────────────────────────────────────────────────

    pub fn folder_count(&self) -> usize {
        self.lock().folders.len()
    }

    pub fn find_folder_calls(&self) -> usize {
        self.find_folder_calls.load(Ordering::SeqCst)
    }

    /// Successful writes since construction.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Resolve a child folder id by name, outside the backend trait.
    pub fn folder_id(&self, parent: &str, name: &str) -> Option<String> {
        let inner = self.lock();
        inner
            .folders
            .iter()
            .find(|(_, f)| f.parent == parent && f.name == name)
            .map(|(id, _)| id.clone())
    }

    /// Sorted names of leaf objects directly under a folder.
    pub fn file_names_under(&self, folder_id: &str) -> Vec<String> {
        let inner = self.lock();
        let mut names: Vec<String> = inner
            .files
            .values()
            .filter(|f| f.parent == folder_id)
            .map(|f| f.name.clone())
            .collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    fn folder_exists(inner: &Inner, id: &str) -> bool {
        id == Self::ROOT || inner.folders.contains_key(id)
    }

    /// Consume one scheduled failure from `plan`, reporting whether the
    /// current call should fail.
    fn take_failure(plan: &mut HashMap<String, u32>, key: &str) -> bool {
        match plan.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn paginate<T>(&self, mut entries: Vec<T>, token: Option<&str>) -> ListPage<T> {
        let offset: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = offset.saturating_add(self.page_size).min(entries.len());
        let next_page = if end < entries.len() {
            Some(end.to_string())
        } else {
            None
        };
        let page: Vec<T> = entries.drain(..end).skip(offset).collect();
        ListPage {
            entries: page,
            next_page,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryStore {
    async fn list_folders(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage<FolderEntry>, StoreError> {
        let mut inner = self.lock();
        if Self::take_failure(&mut inner.fail_lists, parent_id) {
            return Err(StoreError::Transient {
                detail: format!("injected listing failure for '{parent_id}'"),
            });
        }
        if !Self::folder_exists(&inner, parent_id) {
            return Err(StoreError::NotFound {
                id: parent_id.to_string(),
            });
        }
        let mut entries: Vec<FolderEntry> = inner
            .folders
            .iter()
            .filter(|(_, f)| f.parent == parent_id)
            .map(|(id, f)| FolderEntry {
                id: id.clone(),
                name: f.name.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.paginate(entries, page_token))
    }

    async fn list_content(
        &self,
        parent_id: &str,
        kind: Option<ContentKind>,
        page_token: Option<&str>,
    ) -> Result<ListPage<ContentEntry>, StoreError> {
        let mut inner = self.lock();
        if Self::take_failure(&mut inner.fail_lists, parent_id) {
            return Err(StoreError::Transient {
                detail: format!("injected listing failure for '{parent_id}'"),
            });
        }
        if !Self::folder_exists(&inner, parent_id) {
            return Err(StoreError::NotFound {
                id: parent_id.to_string(),
            });
        }
        let mut entries: Vec<ContentEntry> = inner
            .files
            .iter()
            .filter(|(_, f)| f.parent == parent_id)
            .filter(|(_, f)| kind.is_none() || f.kind == kind)
            .map(|(id, f)| ContentEntry {
                id: id.clone(),
                name: f.name.clone(),
                size: Some(f.bytes.len() as u64),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.paginate(entries, page_token))
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.lock();
        if Self::take_failure(&mut inner.fail_reads, id) {
            return Err(StoreError::Transient {
                detail: format!("injected read failure for '{id}'"),
            });
        }
        inner
            .files
            .get(id)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn write(
        &self,
        bytes: &[u8],
        name: &str,
        parent_id: &str,
        _mime_type: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        if Self::take_failure(&mut inner.fail_writes, name) {
            return Err(StoreError::Transient {
                detail: format!("injected write failure for '{name}'"),
            });
        }
        if !Self::folder_exists(&inner, parent_id) {
            return Err(StoreError::NotFound {
                id: parent_id.to_string(),
            });
        }
        // Writes are idempotent by name within a folder: a retried upload
        // replaces the previous object instead of duplicating it.
        let existing = inner
            .files
            .iter()
            .find(|(_, f)| f.parent == parent_id && f.name == name)
            .map(|(id, _)| id.clone());
        let id = match existing {
            Some(id) => id,
            None => {
                inner.seq += 1;
                format!("obj-{}", inner.seq)
            }
        };
        inner.files.insert(
            id.clone(),
            FileNode {
                name: name.to_string(),
                parent: parent_id.to_string(),
                bytes: bytes.to_vec(),
                kind: ContentKind::from_name(name),
            },
        );
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.find_folder_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.folder_id(parent_id, name))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError> {
        {
            let inner = self.lock();
            if !Self::folder_exists(&inner, parent_id) {
                return Err(StoreError::NotFound {
                    id: parent_id.to_string(),
                });
            }
        }
        Ok(self.add_folder(parent_id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_is_sorted_and_paged() {
        let store = MemoryStore::with_page_size(2);
        store.add_folder(MemoryStore::ROOT, "b");
        store.add_folder(MemoryStore::ROOT, "a");
        store.add_folder(MemoryStore::ROOT, "c");

        let first = store.list_folders(MemoryStore::ROOT, None).await.unwrap();
        assert_eq!(
            first.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let token = first.next_page.expect("expected a second page");

        let second = store
            .list_folders(MemoryStore::ROOT, Some(&token))
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].name, "c");
        assert!(second.next_page.is_none());
    }

    #[tokio::test]
    async fn content_listing_filters_by_kind() {
        let store = MemoryStore::new();
        let folder = store.add_folder(MemoryStore::ROOT, "001");
        store.add_file(&folder, "scan.pdf", b"%PDF".to_vec());
        store.add_file(&folder, "page.png", vec![1, 2, 3]);

        let pdfs = store
            .list_content(&folder, Some(ContentKind::Pdf), None)
            .await
            .unwrap();
        assert_eq!(pdfs.entries.len(), 1);
        assert_eq!(pdfs.entries[0].name, "scan.pdf");

        let any = store.list_content(&folder, None, None).await.unwrap();
        assert_eq!(any.entries.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        let folder = store.add_folder(MemoryStore::ROOT, "001");
        let file = store.add_file(&folder, "a.png", vec![0]);
        store.fail_reads(&file, 1);

        assert!(store.read(&file).await.is_err());
        assert!(store.read(&file).await.is_ok());
    }

    #[tokio::test]
    async fn write_replaces_same_name_in_folder() {
        let store = MemoryStore::new();
        let folder = store.add_folder(MemoryStore::ROOT, "out");
        store.write(b"v1", "p1.png", &folder, "image/png").await.unwrap();
        store.write(b"v2", "p1.png", &folder, "image/png").await.unwrap();
        assert_eq!(store.file_names_under(&folder), vec!["p1.png"]);
    }
}
