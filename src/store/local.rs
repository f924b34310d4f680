//! Directory-tree store backend.
//!
//! Treats a local directory as the "remote": folders are directories,
//! object ids are root-relative paths, listings return a single page.
//! This is what lets the CLI drive a real corpus layout end to end
//! without this crate implementing any remote wire protocol.

use super::{ContentEntry, ContentKind, FolderEntry, ListPage, RemoteBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// A [`RemoteBackend`] over a directory tree.
///
/// The empty id addresses the root. All ids are paths relative to it, so
/// they stay stable across processes pointed at the same directory.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        if id.is_empty() {
            self.root.clone()
        } else {
            self.root.join(id)
        }
    }

    fn child_id(parent_id: &str, name: &str) -> String {
        if parent_id.is_empty() {
            name.to_string()
        } else {
            format!("{parent_id}/{name}")
        }
    }

    /// Reject names that would escape the tree. Reported as not-found:
    /// such a child is simply not addressable in this store.
    fn check_name(name: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(StoreError::NotFound {
                id: name.to_string(),
            });
        }
        Ok(())
    }

    fn map_io(id: &str, err: io::Error) -> StoreError {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound { id: id.to_string() }
        } else {
            StoreError::Transient {
                detail: format!("{id}: {err}"),
            }
        }
    }

    async fn read_entries(
        &self,
        parent_id: &str,
        want_dirs: bool,
    ) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let dir = self.resolve(parent_id);
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Self::map_io(parent_id, e))?;
        let mut out = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| Self::map_io(parent_id, e))?
        {
            let ft = entry
                .file_type()
                .await
                .map_err(|e| Self::map_io(parent_id, e))?;
            if ft.is_dir() == want_dirs {
                let name = entry.file_name().to_string_lossy().into_owned();
                out.push((name, entry.path()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl RemoteBackend for LocalDirStore {
    async fn list_folders(
        &self,
        parent_id: &str,
        _page_token: Option<&str>,
    ) -> Result<ListPage<FolderEntry>, StoreError> {
        let entries = self
            .read_entries(parent_id, true)
            .await?
            .into_iter()
            .map(|(name, _)| FolderEntry {
                id: Self::child_id(parent_id, &name),
                name,
            })
            .collect();
        Ok(ListPage::complete(entries))
    }

    async fn list_content(
        &self,
        parent_id: &str,
        kind: Option<ContentKind>,
        _page_token: Option<&str>,
    ) -> Result<ListPage<ContentEntry>, StoreError> {
        let mut entries = Vec::new();
        for (name, path) in self.read_entries(parent_id, false).await? {
            if let Some(wanted) = kind {
                if ContentKind::from_name(&name) != Some(wanted) {
                    continue;
                }
            }
            let size = tokio::fs::metadata(&path).await.ok().map(|m| m.len());
            entries.push(ContentEntry {
                id: Self::child_id(parent_id, &name),
                name,
                size,
            });
        }
        Ok(ListPage::complete(entries))
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        tokio::fs::read(self.resolve(id))
            .await
            .map_err(|e| Self::map_io(id, e))
    }

    async fn write(
        &self,
        bytes: &[u8],
        name: &str,
        parent_id: &str,
        _mime_type: &str,
    ) -> Result<String, StoreError> {
        Self::check_name(name)?;
        let id = Self::child_id(parent_id, name);
        let path = self.resolve(&id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Self::map_io(&id, e))?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(id)
    }

    async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Self::check_name(name)?;
        let id = Self::child_id(parent_id, name);
        match tokio::fs::metadata(self.resolve(&id)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(id)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io(&id, e)),
        }
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError> {
        Self::check_name(name)?;
        let id = Self::child_id(parent_id, name);
        tokio::fs::create_dir_all(self.resolve(&id))
            .await
            .map_err(|e| Self::map_io(&id, e))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_directories_and_files_separately() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("2024-01")).unwrap();
        std::fs::create_dir(tmp.path().join("2024-01/001")).unwrap();
        std::fs::write(tmp.path().join("2024-01/001/a.png"), [1u8]).unwrap();
        std::fs::write(tmp.path().join("2024-01/001/notes.txt"), "x").unwrap();

        let store = LocalDirStore::new(tmp.path());
        let months = store.list_folders("", None).await.unwrap();
        assert_eq!(months.entries.len(), 1);
        assert_eq!(months.entries[0].id, "2024-01");

        let images = store
            .list_content("2024-01/001", Some(ContentKind::Image), None)
            .await
            .unwrap();
        assert_eq!(images.entries.len(), 1);
        assert_eq!(images.entries[0].name, "a.png");

        let any = store.list_content("2024-01/001", None, None).await.unwrap();
        assert_eq!(any.entries.len(), 2);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let folder = store.create_folder("out", "").await.unwrap();
        let id = store
            .write(b"data", "p1.png", &folder, "image/png")
            .await
            .unwrap();
        assert_eq!(store.read(&id).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn find_folder_reports_absence_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        assert_eq!(store.find_folder("missing", "").await.unwrap(), None);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        assert!(store.create_folder("..", "").await.is_err());
        assert!(store.write(b"x", "a/b", "", "image/png").await.is_err());
    }
}
