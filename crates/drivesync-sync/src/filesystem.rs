//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: Uses write-to-temp + rename so readers never see a
//!   partial file. The temp file carries [`TEMP_SUFFIX`] so scanners skip it,
//!   and it is removed again when the write fails.
//! - **Non-recursive directory removal**: content excluded from sync is never
//!   destroyed as a side effect of propagating a deletion.
//! - **Streaming hashes**: files are digested chunk by chunk with the
//!   configured [`HashAlgorithm`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use drivesync_core::domain::ContentHash;
use drivesync_core::ports::{FileSystemState, ILocalFileSystem, LocalEntry};

use crate::exclusion::TEMP_SUFFIX;
use crate::hashing::HashAlgorithm;

/// Read buffer size used while hashing
const HASH_CHUNK: usize = 64 * 1024;

/// Distinguishes concurrent temp files for the same target
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// All operations take absolute paths; the sync root lives at a higher layer.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter {
    algorithm: HashAlgorithm,
}

impl LocalFileSystemAdapter {
    /// Create an adapter hashing with md5
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter hashing with `algorithm`
    #[must_use]
    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn temp_path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(
            ".{name}.{}-{seq}{TEMP_SUFFIX}",
            std::process::id()
        ))
    }
}

/// Converts a filesystem timestamp to UTC
fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().and_then(|st| {
        st.duration_since(std::time::UNIX_EPOCH)
            .ok()
            .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
    })
}

// ============================================================================
// ILocalFileSystem implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        debug!("reading file");
        let data = tokio::fs::read(path).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path.display(), bytes = data.len()))]
    async fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Same directory keeps the rename on one filesystem
        let tmp_path = Self::temp_path_for(path);

        debug!(?tmp_path, "writing to temporary file");
        let written = async {
            tokio::fs::write(&tmp_path, data).await?;
            let file = tokio::fs::File::open(&tmp_path).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(?tmp_path, error = %cleanup, "failed to remove temporary file");
                }
            }
            return Err(e);
        }

        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_file(&self, path: &Path) -> std::io::Result<()> {
        debug!("removing file");
        tokio::fs::remove_file(path).await
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        debug!("removing empty directory");
        tokio::fs::remove_dir(path).await
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        debug!("creating directory");
        tokio::fs::create_dir_all(path).await
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        match tokio::fs::symlink_metadata(to).await {
            Ok(_) => {
                return Err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} already exists", to.display()),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        debug!("renaming");
        tokio::fs::rename(from, to).await
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn stat(&self, path: &Path) -> std::io::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e),
        };

        let is_file = metadata.is_file();
        let size = if is_file { metadata.len() } else { 0 };
        let modified = to_utc(metadata.modified());

        debug!(exists = true, is_file, size, "state retrieved");

        Ok(FileSystemState {
            exists: true,
            is_file,
            size,
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn list_dir(&self, path: &Path) -> std::io::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let entry_path = entry.path();
            // symlink_metadata so links are reported instead of followed
            let metadata = match tokio::fs::symlink_metadata(&entry_path).await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            let file_type = metadata.file_type();
            entries.push(LocalEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                is_dir: file_type.is_dir(),
                is_file: file_type.is_file(),
                is_symlink: file_type.is_symlink(),
                size: if file_type.is_file() { metadata.len() } else { 0 },
                modified: to_utc(metadata.modified()),
                created: to_utc(metadata.created()),
            });
        }

        debug!(entries = entries.len(), "directory listed");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %path.display(), algorithm = %self.algorithm))]
    async fn compute_hash(&self, path: &Path) -> std::io::Result<ContentHash> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; HASH_CHUNK];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hash = hasher.finish();
        debug!(hash = %hash, "hash computed");
        Ok(hash)
    }

    fn hash_bytes(&self, data: &[u8]) -> ContentHash {
        self.algorithm.digest(data)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn path_in(dir: &TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    // ------------------------------------------------------------------
    // read / write roundtrip
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "hello.txt");

        fs.write_file(&path, b"Hello, DriveSync!").await.unwrap();

        let read_back = fs.read_file(&path).await.unwrap();
        assert_eq!(read_back, b"Hello, DriveSync!");
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "a/b/c/nested.txt");

        fs.write_file(&path, b"nested content").await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), b"nested content");
    }

    #[tokio::test]
    async fn test_write_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "overwrite.txt");

        fs.write_file(&path, b"first").await.unwrap();
        fs.write_file(&path, b"second").await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), b"second");
        let names: Vec<String> = fs
            .list_dir(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["overwrite.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_cleans_up_temp_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        // Renaming a file over a non-empty directory fails
        let target = path_in(&dir, "occupied");
        tokio::fs::create_dir_all(target.join("child")).await.unwrap();

        assert!(fs.write_file(&target, b"data").await.is_err());

        let entries = fs.list_dir(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "occupied");
    }

    // ------------------------------------------------------------------
    // delete / remove_dir
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "to_delete.txt");

        fs.write_file(&path, b"bye").await.unwrap();
        fs.delete_file(&path).await.unwrap();

        assert!(!fs.stat(&path).await.unwrap().exists);
    }

    #[tokio::test]
    async fn test_remove_dir_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let sub = path_in(&dir, "subdir");

        fs.write_file(&sub.join("file.txt"), b"data").await.unwrap();
        assert!(fs.remove_dir(&sub).await.is_err());
        assert!(fs.stat(&sub.join("file.txt")).await.unwrap().exists);

        fs.delete_file(&sub.join("file.txt")).await.unwrap();
        fs.remove_dir(&sub).await.unwrap();
        assert!(!fs.stat(&sub).await.unwrap().exists);
    }

    // ------------------------------------------------------------------
    // rename
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let a = path_in(&dir, "a.txt");
        let b = path_in(&dir, "b.txt");

        fs.write_file(&a, b"a").await.unwrap();
        fs.write_file(&b, b"b").await.unwrap();

        let err = fs.rename(&a, &b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let c = path_in(&dir, "c.txt");
        fs.rename(&a, &c).await.unwrap();
        assert_eq!(fs.read_file(&c).await.unwrap(), b"a");
        assert!(!fs.stat(&a).await.unwrap().exists);
    }

    // ------------------------------------------------------------------
    // stat / list_dir
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_stat_existing_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "state.txt");

        fs.write_file(&path, b"twelve bytes").await.unwrap();

        let state = fs.stat(&path).await.unwrap();
        assert!(state.is_regular_file());
        assert_eq!(state.size, 12);
        assert!(state.modified.is_some());
    }

    #[tokio::test]
    async fn test_stat_directory_and_missing() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let sub = path_in(&dir, "new/deep/dir");

        fs.create_dir_all(&sub).await.unwrap();
        assert!(fs.stat(&sub).await.unwrap().is_directory());

        let missing = fs.stat(&path_in(&dir, "nonexistent.txt")).await.unwrap();
        assert_eq!(missing, FileSystemState::not_found());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_dir_reports_symlinks() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let target = path_in(&dir, "real.txt");
        fs.write_file(&target, b"x").await.unwrap();
        std::os::unix::fs::symlink(&target, path_in(&dir, "link.txt")).unwrap();

        let mut entries = fs.list_dir(dir.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries[0].name, "link.txt");
        assert!(entries[0].is_symlink);
        assert!(!entries[0].is_file);
        assert_eq!(entries[1].name, "real.txt");
        assert!(entries[1].is_file);
        assert_eq!(entries[1].size, 1);
    }

    // ------------------------------------------------------------------
    // compute_hash
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_compute_hash_matches_hash_bytes() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "hash_me.txt");
        let content = vec![7u8; HASH_CHUNK * 2 + 13];
        tokio::fs::write(&path, &content).await.unwrap();

        for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha256] {
            let fs = LocalFileSystemAdapter::with_algorithm(algorithm);
            assert_eq!(
                fs.compute_hash(&path).await.unwrap(),
                fs.hash_bytes(&content)
            );
        }
    }

    #[tokio::test]
    async fn test_compute_hash_empty_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = path_in(&dir, "empty.txt");

        fs.write_file(&path, b"").await.unwrap();

        let hash = fs.compute_hash(&path).await.unwrap();
        assert_eq!(hash.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
