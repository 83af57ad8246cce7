//! Directory-backed remote store
//!
//! Implements [`IRemoteStore`] on top of a plain directory tree, for
//! syncing against a mounted share or another disk, and for tests.
//!
//! Item ids are the item's path below the base directory, prefixed with
//! `/` (the base itself is `/`). Whitespace, control characters and `%` are
//! percent-encoded so every id is a valid [`RemoteId`]. Revisions are the
//! modification time in nanoseconds; content hashes use the configured
//! [`HashAlgorithm`]. Writes go through [`LocalFileSystemAdapter`] and are
//! atomic.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use drivesync_core::domain::{RelativePath, RemoteId, RevisionMarker};
use drivesync_core::ports::{
    FileSystemState, ILocalFileSystem, IRemoteStore, RemoteEntry, RemoteError, RemotePage,
};

use crate::exclusion::TEMP_SUFFIX;
use crate::filesystem::LocalFileSystemAdapter;
use crate::hashing::HashAlgorithm;

/// Id of the base directory
pub const ROOT_ID: &str = "/";

const DEFAULT_PAGE_SIZE: usize = 100;

/// Remote store over a local directory tree
#[derive(Debug, Clone)]
pub struct FolderRemoteStore {
    base: PathBuf,
    fs: LocalFileSystemAdapter,
    page_size: usize,
}

impl FolderRemoteStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            fs: LocalFileSystemAdapter::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.fs = LocalFileSystemAdapter::with_algorithm(algorithm);
        self
    }

    /// Entries per `list_children` page
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Id of the base directory
    pub fn root_id() -> Result<RemoteId, RemoteError> {
        RemoteId::new(ROOT_ID.to_string()).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// Id of the item at `path` below the base directory
    pub fn id_for(path: &RelativePath) -> Result<RemoteId, RemoteError> {
        RemoteId::new(encode_id(path.as_str()))
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// Path below the base directory; `None` for the base itself
    fn resolve(&self, id: &RemoteId) -> Result<Option<RelativePath>, RemoteError> {
        let raw = decode_id(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(format!("malformed id {id}")))?;
        if raw.is_empty() {
            return Ok(None);
        }
        RelativePath::new(raw)
            .map(Some)
            .map_err(|e| RemoteError::NotFound(format!("{id}: {e}")))
    }

    fn absolute(&self, path: Option<&RelativePath>) -> PathBuf {
        match path {
            Some(path) => path.to_local(&self.base),
            None => self.base.clone(),
        }
    }

    fn child(
        &self,
        parent: Option<&RelativePath>,
        name: &str,
    ) -> Result<RelativePath, RemoteError> {
        match parent {
            Some(parent) => parent.join(name),
            None => RelativePath::from_name(name),
        }
        .map_err(|e| RemoteError::PreconditionFailed(format!("invalid name {name:?}: {e}")))
    }

    async fn stat(&self, path: Option<&RelativePath>) -> Result<FileSystemState, RemoteError> {
        self.fs
            .stat(&self.absolute(path))
            .await
            .map_err(|e| map_io(&display(path), e))
    }

    /// Requires `path` to be an existing directory
    async fn require_folder(&self, path: Option<&RelativePath>) -> Result<(), RemoteError> {
        let state = self.stat(path).await?;
        if state.is_directory() {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("folder {}", display(path))))
        }
    }

    async fn entry_for(&self, path: Option<&RelativePath>) -> Result<RemoteEntry, RemoteError> {
        let abs = self.absolute(path);
        let state = self.stat(path).await?;
        if !state.exists {
            return Err(RemoteError::NotFound(display(path)));
        }

        let id = match path {
            Some(path) => Self::id_for(path)?,
            None => Self::root_id()?,
        };
        let name = match path {
            Some(path) => path.file_name().to_string(),
            None => self
                .base
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let mut entry = RemoteEntry {
            id: Some(id.as_str().to_string()),
            name: Some(name),
            is_folder: Some(state.is_directory()),
            modified: state.modified,
            ..RemoteEntry::default()
        };

        if state.is_regular_file() {
            let hash = self
                .fs
                .compute_hash(&abs)
                .await
                .map_err(|e| map_io(&display(path), e))?;
            entry.size = Some(state.size);
            entry.hash = Some(hash.as_str().to_string());
            entry.revision = state
                .modified
                .and_then(|m| m.timestamp_nanos_opt())
                .map(|nanos| nanos.to_string());
        }

        Ok(entry)
    }
}

/// Percent-encodes whitespace, control characters and `%`
fn encode_id(path: &str) -> String {
    let mut id = String::with_capacity(path.len() + 1);
    id.push('/');
    for c in path.chars() {
        if c == '%' || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                id.push_str(&format!("%{byte:02X}"));
            }
        } else {
            id.push(c);
        }
    }
    id
}

fn decode_id(id: &str) -> Option<String> {
    let rest = id.strip_prefix('/')?;
    let bytes = rest.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = rest.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn display(path: Option<&RelativePath>) -> String {
    path.map_or_else(|| ROOT_ID.to_string(), |p| p.to_string())
}

fn map_io(what: &str, err: std::io::Error) -> RemoteError {
    match err.kind() {
        ErrorKind::NotFound => RemoteError::NotFound(what.to_string()),
        ErrorKind::PermissionDenied => RemoteError::PermissionDenied(format!("{what}: {err}")),
        ErrorKind::AlreadyExists => RemoteError::PreconditionFailed(format!("{what} already exists")),
        ErrorKind::TimedOut => RemoteError::Network(format!("{what}: {err}")),
        _ => RemoteError::Server(format!("{what}: {err}")),
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FolderRemoteStore {
    #[instrument(skip(self), fields(folder = %folder))]
    async fn list_children(
        &self,
        folder: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        let path = self.resolve(folder)?;
        self.require_folder(path.as_ref()).await?;

        let mut names: Vec<String> = self
            .fs
            .list_dir(&self.absolute(path.as_ref()))
            .await
            .map_err(|e| map_io(&display(path.as_ref()), e))?
            .into_iter()
            .filter(|e| (e.is_file || e.is_dir) && !e.is_symlink && !e.name.ends_with(TEMP_SUFFIX))
            .map(|e| e.name)
            .collect();
        names.sort();

        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::InvalidResponse(format!("bad page token {token:?}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(names.len());

        let mut entries = Vec::with_capacity(end.saturating_sub(start));
        for name in names.get(start..end).unwrap_or_default() {
            let child = self.child(path.as_ref(), name)?;
            match self.entry_for(Some(&child)).await {
                Ok(entry) => entries.push(entry),
                // Removed between listing and stat
                Err(RemoteError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        debug!(count = entries.len(), start, "listed folder page");
        Ok(RemotePage {
            entries,
            next_page_token: (end < names.len()).then(|| end.to_string()),
        })
    }

    async fn get_item(&self, id: &RemoteId) -> Result<RemoteEntry, RemoteError> {
        let path = self.resolve(id)?;
        self.entry_for(path.as_ref()).await
    }

    async fn find_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<Option<RemoteEntry>, RemoteError> {
        let parent = self.resolve(parent)?;
        self.require_folder(parent.as_ref()).await?;
        let child = self.child(parent.as_ref(), name)?;

        if self.stat(Some(&child)).await?.is_directory() {
            self.entry_for(Some(&child)).await.map(Some)
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self), fields(parent = %parent))]
    async fn create_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<RemoteEntry, RemoteError> {
        let parent = self.resolve(parent)?;
        self.require_folder(parent.as_ref()).await?;
        let child = self.child(parent.as_ref(), name)?;

        if self.stat(Some(&child)).await?.exists {
            return Err(RemoteError::PreconditionFailed(format!("{child} already exists")));
        }
        self.fs
            .create_dir_all(&self.absolute(Some(&child)))
            .await
            .map_err(|e| map_io(child.as_str(), e))?;
        self.entry_for(Some(&child)).await
    }

    #[instrument(skip(self, data), fields(parent = %parent, bytes = data.len()))]
    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteEntry, RemoteError> {
        let parent = self.resolve(parent)?;
        self.require_folder(parent.as_ref()).await?;
        let child = self.child(parent.as_ref(), name)?;

        if self.stat(Some(&child)).await?.exists {
            return Err(RemoteError::PreconditionFailed(format!("{child} already exists")));
        }
        self.fs
            .write_file(&self.absolute(Some(&child)), &data)
            .await
            .map_err(|e| map_io(child.as_str(), e))?;
        self.entry_for(Some(&child)).await
    }

    #[instrument(skip(self, data), fields(id = %id, bytes = data.len()))]
    async fn update_file(
        &self,
        id: &RemoteId,
        data: Vec<u8>,
        expected_revision: Option<&RevisionMarker>,
    ) -> Result<RemoteEntry, RemoteError> {
        let path = self
            .resolve(id)?
            .ok_or_else(|| RemoteError::PreconditionFailed("the root is not a file".into()))?;
        let current = self.entry_for(Some(&path)).await?;
        if current.is_folder == Some(true) {
            return Err(RemoteError::PreconditionFailed(format!("{path} is a folder")));
        }
        if let Some(expected) = expected_revision {
            if current.revision.as_deref() != Some(expected.as_str()) {
                return Err(RemoteError::PreconditionFailed(format!(
                    "{path} is at revision {:?}, expected {expected}",
                    current.revision
                )));
            }
        }

        self.fs
            .write_file(&self.absolute(Some(&path)), &data)
            .await
            .map_err(|e| map_io(path.as_str(), e))?;
        self.entry_for(Some(&path)).await
    }

    async fn download(&self, id: &RemoteId) -> Result<Vec<u8>, RemoteError> {
        let path = self
            .resolve(id)?
            .ok_or_else(|| RemoteError::NotFound("the root is not a file".into()))?;
        let abs = self.absolute(Some(&path));
        if !self.stat(Some(&path)).await?.is_regular_file() {
            return Err(RemoteError::NotFound(format!("file {path}")));
        }
        self.fs.read_file(&abs).await.map_err(|e| map_io(path.as_str(), e))
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let path = self
            .resolve(id)?
            .ok_or_else(|| RemoteError::PermissionDenied("the root cannot be deleted".into()))?;
        let abs = self.absolute(Some(&path));
        let state = self.stat(Some(&path)).await?;

        if !state.exists {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        let removed = if state.is_directory() {
            let children = self
                .fs
                .list_dir(&abs)
                .await
                .map_err(|e| map_io(path.as_str(), e))?;
            if !children.is_empty() {
                return Err(RemoteError::PreconditionFailed(format!("{path} is not empty")));
            }
            self.fs.remove_dir(&abs).await
        } else {
            self.fs.delete_file(&abs).await
        };
        removed.map_err(|e| map_io(path.as_str(), e))
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn rename(&self, id: &RemoteId, new_name: &str) -> Result<RemoteEntry, RemoteError> {
        let path = self
            .resolve(id)?
            .ok_or_else(|| RemoteError::PermissionDenied("the root cannot be renamed".into()))?;
        let target = path
            .with_file_name(new_name)
            .map_err(|e| RemoteError::PreconditionFailed(format!("invalid name {new_name:?}: {e}")))?;

        if !self.stat(Some(&path)).await?.exists {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        self.fs
            .rename(&self.absolute(Some(&path)), &self.absolute(Some(&target)))
            .await
            .map_err(|e| map_io(target.as_str(), e))?;
        self.entry_for(Some(&target)).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s.to_string()).unwrap()
    }

    fn store(dir: &TempDir) -> FolderRemoteStore {
        FolderRemoteStore::new(dir.path()).with_page_size(2)
    }

    #[test]
    fn test_ids_encode_spaces() {
        let id = FolderRemoteStore::id_for(&rel("notes/plan (v2).txt")).unwrap();
        assert_eq!(id.as_str(), "/notes/plan%20(v2).txt");
        assert_eq!(decode_id(id.as_str()).unwrap(), "notes/plan (v2).txt");
        assert_eq!(decode_id("/100%25").unwrap(), "100%");
        assert_eq!(decode_id("/").unwrap(), "");
        assert!(decode_id("/bad%2").is_none());
    }

    #[tokio::test]
    async fn test_listing_is_paged_and_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["c.txt", "a.txt", "b.txt"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let remote = store(&dir);
        let root = FolderRemoteStore::root_id().unwrap();

        let first = remote.list_children(&root, None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].name.as_deref(), Some("a.txt"));
        let token = first.next_page_token.unwrap();

        let second = remote.list_children(&root, Some(&token)).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].name.as_deref(), Some("c.txt"));
        assert!(second.next_page_token.is_none());

        let entry = &second.entries[0];
        assert_eq!(entry.size, Some(5));
        assert!(entry.hash.is_some());
        assert!(entry.revision.is_some());
    }

    #[tokio::test]
    async fn test_create_refuses_existing_names() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        let root = FolderRemoteStore::root_id().unwrap();

        remote.create_file(&root, "a.txt", b"one".to_vec()).await.unwrap();
        let err = remote
            .create_file(&root, "a.txt", b"two".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed(_)));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_update_checks_revision() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        let root = FolderRemoteStore::root_id().unwrap();

        let created = remote.create_file(&root, "a.txt", b"one".to_vec()).await.unwrap();
        let id = RemoteId::new(created.id.unwrap()).unwrap();
        let stale = RevisionMarker::new("1".into()).unwrap();

        let err = remote
            .update_file(&id, b"two".to_vec(), Some(&stale))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed(_)));

        let current = RevisionMarker::new(created.revision.unwrap()).unwrap();
        let updated = remote
            .update_file(&id, b"two".to_vec(), Some(&current))
            .await
            .unwrap();
        assert_eq!(updated.size, Some(3));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_non_empty_folder_is_not_deleted() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), "a").unwrap();
        let remote = store(&dir);
        let id = FolderRemoteStore::id_for(&rel("docs")).unwrap();

        let err = remote.delete(&id).await.unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed(_)));
        assert!(dir.path().join("docs/a.txt").exists());
    }

    #[tokio::test]
    async fn test_find_folder_and_rename() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        let root = FolderRemoteStore::root_id().unwrap();

        assert!(remote.find_folder(&root, "docs").await.unwrap().is_none());
        remote.create_folder(&root, "docs").await.unwrap();
        let found = remote.find_folder(&root, "docs").await.unwrap().unwrap();
        assert_eq!(found.is_folder, Some(true));

        let file = remote.create_file(&root, "a.txt", b"a".to_vec()).await.unwrap();
        let id = RemoteId::new(file.id.unwrap()).unwrap();
        let renamed = remote.rename(&id, "a (old).txt").await.unwrap();
        assert_eq!(renamed.id.as_deref(), Some("/a%20(old).txt"));
        assert!(dir.path().join("a (old).txt").exists());
        assert!(matches!(
            remote.get_item(&id).await.unwrap_err(),
            RemoteError::NotFound(_)
        ));
    }
}
