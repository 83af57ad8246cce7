//! Change scanner
//!
//! Produces complete, path-ordered snapshots of both sides of a sync root.
//!
//! ## Local walk
//!
//! Depth-first through the filesystem port. Symlinks and special files are
//! skipped, as is anything the [`ExclusionPolicy`] rejects. A file whose size
//! and mtime match the prior snapshot keeps the prior hash instead of being
//! re-read.
//!
//! ## Remote walk
//!
//! Breadth-first from the root folder id, following page tokens until the
//! listing is exhausted. Every page request goes through the [`RetryPolicy`],
//! so a transient failure never truncates the snapshot. Entries are parsed
//! into [`TrackedItem`]s at this boundary and fail closed: a missing or
//! invalid required field aborts the scan with [`ScanError::MalformedEntry`].

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use drivesync_core::domain::{
    ContentHash, RelativePath, RemoteId, RevisionMarker, SyncRoot, SyncState, TrackedItem,
};
use drivesync_core::ports::{ILocalFileSystem, IRemoteStore, RemoteEntry, RemoteError};

use crate::exclusion::ExclusionPolicy;
use crate::retry::{RetryError, RetryPolicy};
use crate::ScanError;

/// Walks the local tree and the remote listing of a sync root
pub struct ChangeScanner {
    local_fs: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    exclusions: ExclusionPolicy,
    retry: RetryPolicy,
}

impl ChangeScanner {
    pub fn new(
        local_fs: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        exclusions: ExclusionPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            local_fs,
            remote,
            exclusions,
            retry,
        }
    }

    pub fn exclusions(&self) -> &ExclusionPolicy {
        &self.exclusions
    }

    /// Scans both sides concurrently
    ///
    /// Returns `(local, remote)`, each sorted by path. An authentication
    /// failure on the remote side takes precedence over a local failure.
    #[instrument(skip(self, prior, cancel), fields(root = %root.id()))]
    pub async fn scan(
        &self,
        root: &SyncRoot,
        prior: &SyncState,
        cancel: &CancellationToken,
    ) -> Result<(Vec<TrackedItem>, Vec<TrackedItem>), ScanError> {
        let (local, remote) = tokio::join!(
            self.scan_local(root.local_path(), prior, cancel),
            self.scan_remote(root.remote_folder(), cancel),
        );

        match (local, remote) {
            (Ok(local), Ok(remote)) => {
                info!(local = local.len(), remote = remote.len(), "Scan complete");
                Ok((local, remote))
            }
            (_, Err(e @ ScanError::Auth(_))) => Err(e),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    // ========================================================================
    // Local side
    // ========================================================================

    /// Walks the local root and returns every tracked file and directory
    pub async fn scan_local(
        &self,
        root: &Path,
        prior: &SyncState,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrackedItem>, ScanError> {
        let unavailable = |reason: String| ScanError::RootUnavailable {
            path: root.display().to_string(),
            reason,
        };

        let state = self
            .local_fs
            .stat(root)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !state.exists {
            return Err(unavailable("does not exist".to_string()));
        }
        if !state.is_directory() {
            return Err(unavailable("not a directory".to_string()));
        }
        // Readability check before anything else is listed
        self.local_fs
            .list_dir(root)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let mut items = Vec::new();
        self.walk_directory(root, root, prior, cancel, &mut items)
            .await?;
        items.sort_by(|a, b| a.path().cmp(b.path()));

        debug!(items = items.len(), "Local scan complete");
        Ok(items)
    }

    /// Recursively collects items below `dir`
    fn walk_directory<'a>(
        &'a self,
        root: &'a Path,
        dir: &'a Path,
        prior: &'a SyncState,
        cancel: &'a CancellationToken,
        items: &'a mut Vec<TrackedItem>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let entries = self.local_fs.list_dir(dir).await.map_err(|e| ScanError::Io {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;

            for entry in entries {
                if entry.is_symlink || !(entry.is_file || entry.is_dir) {
                    debug!(path = %entry.path.display(), "Skipping special file");
                    continue;
                }

                let path = match RelativePath::from_local(root, &entry.path) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(path = %entry.path.display(), error = %e, "Skipping unsyncable name");
                        continue;
                    }
                };

                if self.exclusions.is_excluded(&path) {
                    debug!(path = %path, "Excluded");
                    continue;
                }

                let modified = entry.modified.unwrap_or_else(chrono::Utc::now);

                if entry.is_dir {
                    items.push(TrackedItem::local_dir(path, modified, entry.created));
                    self.walk_directory(root, &entry.path, prior, cancel, items)
                        .await?;
                    continue;
                }

                let hash = match reusable_hash(prior.get(&path), entry.size, entry.modified) {
                    Some(hash) => hash,
                    None => match self.local_fs.compute_hash(&entry.path).await {
                        Ok(hash) => hash,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            debug!(path = %path, "File vanished during scan");
                            continue;
                        }
                        Err(e) => {
                            return Err(ScanError::Io {
                                path: entry.path.display().to_string(),
                                reason: e.to_string(),
                            })
                        }
                    },
                };

                items.push(TrackedItem::local_file(
                    path,
                    entry.size,
                    hash,
                    modified,
                    entry.created,
                ));
            }

            Ok(())
        })
    }

    // ========================================================================
    // Remote side
    // ========================================================================

    /// Lists everything below the remote root folder
    pub async fn scan_remote(
        &self,
        root_folder: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrackedItem>, ScanError> {
        let mut items = Vec::new();
        let mut queue: VecDeque<(RemoteId, Option<RelativePath>)> = VecDeque::new();
        queue.push_back((root_folder.clone(), None));

        while let Some((folder, prefix)) = queue.pop_front() {
            let entries = match self.list_folder(&folder, cancel).await {
                Err(ScanError::Remote(RemoteError::NotFound(reason))) if prefix.is_none() => {
                    return Err(ScanError::RootUnavailable {
                        path: folder.to_string(),
                        reason,
                    })
                }
                other => other?,
            };

            let mut seen = HashSet::new();
            for entry in entries {
                if entry.trashed {
                    continue;
                }

                let item = parse_entry(&entry, prefix.as_ref()).map_err(|reason| {
                    ScanError::MalformedEntry {
                        folder: folder.to_string(),
                        reason,
                    }
                })?;

                if !seen.insert(item.path().file_name().to_string()) {
                    warn!(path = %item.path(), "Duplicate remote name, keeping the first entry");
                    continue;
                }

                if self.exclusions.is_excluded(item.path()) {
                    debug!(path = %item.path(), "Excluded");
                    continue;
                }

                if let (true, Some(id)) = (item.is_dir(), item.remote_id()) {
                    queue.push_back((id.clone(), Some(item.path().clone())));
                }
                items.push(item);
            }
        }

        items.sort_by(|a, b| a.path().cmp(b.path()));
        debug!(items = items.len(), "Remote scan complete");
        Ok(items)
    }

    /// Fetches every page of one folder
    async fn list_folder(
        &self,
        folder: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, ScanError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let token = page_token.clone();
            let page = self
                .retry
                .run("list_children", cancel, || {
                    self.remote.list_children(folder, token.as_deref())
                })
                .await
                .map_err(|e| match e {
                    RetryError::Failed(err) => ScanError::from(err),
                    RetryError::Cancelled => ScanError::Cancelled,
                })?;

            entries.extend(page.entries);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(entries)
    }
}

/// The prior hash, when the file still has the prior size and mtime
fn reusable_hash(
    prior: Option<&TrackedItem>,
    size: u64,
    modified: Option<chrono::DateTime<chrono::Utc>>,
) -> Option<ContentHash> {
    let prior = prior?;
    if prior.is_file() && prior.size() == size && modified.is_some() && prior.local_modified() == modified
    {
        prior.hash().cloned()
    } else {
        None
    }
}

/// Parses one listing entry found below `parent` (`None` for the root folder)
///
/// Every field the engine relies on must be present and valid; nothing is
/// defaulted.
pub(crate) fn parse_entry(
    entry: &RemoteEntry,
    parent: Option<&RelativePath>,
) -> Result<TrackedItem, String> {
    let name = entry
        .name
        .as_deref()
        .ok_or_else(|| "entry without a name".to_string())?;
    let path = match parent {
        Some(parent) => parent.join(name),
        None => RelativePath::from_name(name),
    }
    .map_err(|e| format!("invalid name {name:?}: {e}"))?;

    parse_entry_at(entry, path)
}

/// Parses an entry whose path is already known
pub(crate) fn parse_entry_at(entry: &RemoteEntry, path: RelativePath) -> Result<TrackedItem, String> {
    let id = entry
        .id
        .clone()
        .ok_or_else(|| format!("{path}: missing id"))
        .and_then(|id| RemoteId::new(id).map_err(|e| format!("{path}: {e}")))?;
    let is_folder = entry
        .is_folder
        .ok_or_else(|| format!("{path}: missing item type"))?;
    let modified = entry
        .modified
        .ok_or_else(|| format!("{path}: missing modification time"))?;

    if is_folder {
        return Ok(TrackedItem::remote_dir(path, id, modified, entry.created));
    }

    let size = entry.size.ok_or_else(|| format!("{path}: missing size"))?;
    let hash = entry
        .hash
        .clone()
        .ok_or_else(|| format!("{path}: missing content hash"))
        .and_then(|h| ContentHash::new(h).map_err(|e| format!("{path}: {e}")))?;
    let revision = entry
        .revision
        .clone()
        .map(RevisionMarker::new)
        .transpose()
        .map_err(|e| format!("{path}: {e}"))?;

    Ok(TrackedItem::remote_file(
        path,
        id,
        size,
        hash,
        revision,
        modified,
        entry.created,
    ))
}
