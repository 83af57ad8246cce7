//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local
//! filesystem: reading and atomically writing files, listing directories,
//! and computing content hashes.
//!
//! ## Design Notes
//!
//! - Uses `std::io::Result` so callers can match on `ErrorKind::NotFound`
//!   and `ErrorKind::PermissionDenied` directly.
//! - All paths are absolute; the engine resolves `RelativePath`s against
//!   the sync root before calling in.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::newtypes::ContentHash;

// ============================================================================
// FileSystemState struct
// ============================================================================

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    /// Whether the file/directory exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories and other types)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent files)
    pub size: u64,
    /// Last modification time (None if not available or file doesn't exist)
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// Returns true if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// Returns true if the path exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

// ============================================================================
// LocalEntry struct
// ============================================================================

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Absolute path of the entry
    pub path: PathBuf,
    /// Final path component
    pub name: String,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Creation time where the filesystem records one
    pub created: Option<DateTime<Utc>>,
}

// ============================================================================
// ILocalFileSystem trait
// ============================================================================

/// Port trait for local filesystem operations
///
/// ## Implementation Notes
///
/// - `write_file` must be atomic: readers see either the old content or the
///   new content, never a prefix. A failed write leaves no partial file.
/// - `remove_dir` must not be recursive, so content excluded from sync is
///   never removed as a side effect.
/// - `compute_hash` must use the same algorithm as the remote store's
///   reported digests.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file
    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Atomically writes a file, creating parent directories as needed
    async fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()>;

    /// Deletes a regular file
    async fn delete_file(&self, path: &Path) -> std::io::Result<()>;

    /// Removes an empty directory
    async fn remove_dir(&self, path: &Path) -> std::io::Result<()>;

    /// Creates a directory and all missing parents (`mkdir -p`)
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Renames a file or directory; fails if `to` already exists
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Gets the current state of a path
    ///
    /// Returns `FileSystemState::not_found()` for missing paths rather than
    /// an error.
    async fn stat(&self, path: &Path) -> std::io::Result<FileSystemState>;

    /// Lists the direct children of a directory
    async fn list_dir(&self, path: &Path) -> std::io::Result<Vec<LocalEntry>>;

    /// Computes the content digest of a file
    async fn compute_hash(&self, path: &Path) -> std::io::Result<ContentHash>;

    /// Computes the content digest of an in-memory buffer
    fn hash_bytes(&self, data: &[u8]) -> ContentHash;
}
