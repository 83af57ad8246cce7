//! TrackedItem domain entity
//!
//! A [`TrackedItem`] is the metadata snapshot of one file or directory.
//! Scans produce one-sided items (local fields or remote fields filled in);
//! the persisted sync state holds merged items carrying both sides as they
//! were agreed after the last successful transfer.
//!
//! ## Change detection
//!
//! ```text
//!   prior (merged) ──┬── local_changed_since ──► current local scan
//!                    └── remote_changed_since ─► current remote scan
//! ```
//!
//! Both sides are judged on content hash. Without a hash, remote changes
//! fall back to the revision marker and local changes to the size; a
//! changed remote id is always a change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::newtypes::{ContentHash, RelativePath, RemoteId, RevisionMarker};

// ============================================================================
// ItemKind
// ============================================================================

/// Whether an item is a regular file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Directory,
}

impl ItemKind {
    /// Returns the kind name as a static string
    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// TrackedItem
// ============================================================================

/// Metadata snapshot of one file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    path: RelativePath,
    kind: ItemKind,
    size: u64,
    hash: Option<ContentHash>,
    remote_id: Option<RemoteId>,
    revision: Option<RevisionMarker>,
    local_modified: Option<DateTime<Utc>>,
    remote_modified: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted: bool,
}

impl TrackedItem {
    fn blank(path: RelativePath, kind: ItemKind) -> Self {
        Self {
            path,
            kind,
            size: 0,
            hash: None,
            remote_id: None,
            revision: None,
            local_modified: None,
            remote_modified: None,
            created_at: None,
            synced_at: None,
            deleted: false,
        }
    }

    /// A file as seen by the local scanner
    pub fn local_file(
        path: RelativePath,
        size: u64,
        hash: ContentHash,
        modified: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            size,
            hash: Some(hash),
            local_modified: Some(modified),
            created_at,
            ..Self::blank(path, ItemKind::File)
        }
    }

    /// A directory as seen by the local scanner
    pub fn local_dir(
        path: RelativePath,
        modified: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            local_modified: Some(modified),
            created_at,
            ..Self::blank(path, ItemKind::Directory)
        }
    }

    /// A file as reported by the remote store
    pub fn remote_file(
        path: RelativePath,
        remote_id: RemoteId,
        size: u64,
        hash: ContentHash,
        revision: Option<RevisionMarker>,
        modified: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            size,
            hash: Some(hash),
            remote_id: Some(remote_id),
            revision,
            remote_modified: Some(modified),
            created_at,
            ..Self::blank(path, ItemKind::File)
        }
    }

    /// A directory as reported by the remote store
    pub fn remote_dir(
        path: RelativePath,
        remote_id: RemoteId,
        modified: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            remote_id: Some(remote_id),
            remote_modified: Some(modified),
            created_at,
            ..Self::blank(path, ItemKind::Directory)
        }
    }

    /// Combine a local and a remote view of the same path into a snapshot entry
    ///
    /// Size and hash come from the local side when it has them.
    pub fn merged(local: &TrackedItem, remote: &TrackedItem, synced_at: DateTime<Utc>) -> Self {
        Self {
            path: local.path.clone(),
            kind: local.kind,
            size: local.size,
            hash: local.hash.clone().or_else(|| remote.hash.clone()),
            remote_id: remote.remote_id.clone(),
            revision: remote.revision.clone(),
            local_modified: local.local_modified,
            remote_modified: remote.remote_modified,
            created_at: match (local.created_at, remote.created_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            synced_at: Some(synced_at),
            deleted: false,
        }
    }

    /// A removal marker for `path`, used in incremental state records
    pub fn tombstone(path: RelativePath, kind: ItemKind) -> Self {
        Self {
            deleted: true,
            ..Self::blank(path, kind)
        }
    }

    // --- getters ---

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn revision(&self) -> Option<&RevisionMarker> {
        self.revision.as_ref()
    }

    pub fn local_modified(&self) -> Option<DateTime<Utc>> {
        self.local_modified
    }

    pub fn remote_modified(&self) -> Option<DateTime<Utc>> {
        self.remote_modified
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Most recent modification time known on either side
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        match (self.local_modified, self.remote_modified) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    // --- setters ---

    pub fn set_hash(&mut self, hash: Option<ContentHash>) {
        self.hash = hash;
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn set_remote_id(&mut self, remote_id: Option<RemoteId>) {
        self.remote_id = remote_id;
    }

    pub fn set_revision(&mut self, revision: Option<RevisionMarker>) {
        self.revision = revision;
    }

    pub fn set_local_modified(&mut self, modified: Option<DateTime<Utc>>) {
        self.local_modified = modified;
    }

    pub fn set_remote_modified(&mut self, modified: Option<DateTime<Utc>>) {
        self.remote_modified = modified;
    }

    pub fn set_synced_at(&mut self, synced_at: Option<DateTime<Utc>>) {
        self.synced_at = synced_at;
    }

    /// Same item under a different path
    #[must_use]
    pub fn with_path(mut self, path: RelativePath) -> Self {
        self.path = path;
        self
    }

    /// Drop all remote-side identity so the item is sent as a new remote file
    #[must_use]
    pub fn detached_from_remote(mut self) -> Self {
        self.remote_id = None;
        self.revision = None;
        self.remote_modified = None;
        self
    }

    // --- comparisons ---

    /// True when both items are directories, or files with equal hashes
    pub fn same_content(&self, other: &TrackedItem) -> bool {
        match (self.kind, other.kind) {
            (ItemKind::Directory, ItemKind::Directory) => true,
            (ItemKind::File, ItemKind::File) => match (&self.hash, &other.hash) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }

    /// True when this local scan result differs from the prior snapshot entry
    pub fn local_changed_since(&self, prior: &TrackedItem) -> bool {
        if self.kind != prior.kind {
            return true;
        }
        if self.is_dir() {
            return false;
        }
        match (&self.hash, &prior.hash) {
            (Some(a), Some(b)) => a != b,
            _ => self.size != prior.size || self.local_modified != prior.local_modified,
        }
    }

    /// True when this remote scan result differs from the prior snapshot entry
    pub fn remote_changed_since(&self, prior: &TrackedItem) -> bool {
        if self.kind != prior.kind {
            return true;
        }
        if self.remote_id != prior.remote_id {
            return true;
        }
        if self.is_dir() {
            return false;
        }
        // Content decides when both hashes are known; a revision bump alone
        // (e.g. a touched mtime) is not an edit
        if let (Some(a), Some(b)) = (&self.hash, &prior.hash) {
            return a != b;
        }
        if let (Some(a), Some(b)) = (&self.revision, &prior.revision) {
            if a != b {
                return true;
            }
        }
        self.size != prior.size
    }

    /// True when the item appeared after the prior entry was last agreed
    pub fn created_after_sync(&self, prior: &TrackedItem) -> bool {
        match (self.created_at, prior.synced_at) {
            (Some(created), Some(synced)) => created > synced,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s.to_string()).unwrap()
    }

    fn hash(s: &str) -> ContentHash {
        ContentHash::new(s.to_string()).unwrap()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn remote_file(path: &str, h: &str, rev: &str) -> TrackedItem {
        TrackedItem::remote_file(
            rel(path),
            RemoteId::new(format!("id-{path}").replace('/', "_")).unwrap(),
            5,
            hash(h),
            Some(RevisionMarker::new(rev.to_string()).unwrap()),
            at(2),
            None,
        )
    }

    #[test]
    fn test_merged_combines_sides() {
        let local = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(1), Some(at(1)));
        let remote = remote_file("a.txt", "aa", "7");
        let merged = TrackedItem::merged(&local, &remote, at(3));

        assert_eq!(merged.local_modified(), Some(at(1)));
        assert_eq!(merged.remote_modified(), Some(at(2)));
        assert_eq!(merged.revision().unwrap().as_str(), "7");
        assert_eq!(merged.synced_at(), Some(at(3)));
        assert_eq!(merged.modified(), Some(at(2)));
        assert!(!merged.is_deleted());
    }

    #[test]
    fn test_local_change_detection_uses_hash() {
        let prior = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(1), None);
        let touched = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(4), None);
        let edited = TrackedItem::local_file(rel("a.txt"), 5, hash("bb"), at(4), None);

        assert!(!touched.local_changed_since(&prior));
        assert!(edited.local_changed_since(&prior));
    }

    #[test]
    fn test_remote_change_detection() {
        let prior = remote_file("a.txt", "aa", "1");
        assert!(!remote_file("a.txt", "aa", "1").remote_changed_since(&prior));
        assert!(remote_file("a.txt", "bb", "1").remote_changed_since(&prior));
        assert!(remote_file("a.txt", "bb", "2").remote_changed_since(&prior));
    }

    #[test]
    fn test_remote_revision_bump_with_same_hash_is_not_a_change() {
        let prior = remote_file("a.txt", "aa", "1");
        assert!(!remote_file("a.txt", "aa", "2").remote_changed_since(&prior));
    }

    #[test]
    fn test_remote_revision_decides_without_hash() {
        let mut prior = remote_file("a.txt", "aa", "1");
        prior.hash = None;
        let mut bumped = remote_file("a.txt", "aa", "2");
        bumped.hash = None;
        let mut same = remote_file("a.txt", "aa", "1");
        same.hash = None;

        assert!(bumped.remote_changed_since(&prior));
        assert!(!same.remote_changed_since(&prior));
    }

    #[test]
    fn test_kind_change_is_a_change() {
        let prior = TrackedItem::local_file(rel("x"), 1, hash("aa"), at(1), None);
        let now_dir = TrackedItem::local_dir(rel("x"), at(2), None);
        assert!(now_dir.local_changed_since(&prior));
        assert!(!now_dir.same_content(&prior));
    }

    #[test]
    fn test_created_after_sync() {
        let local = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(1), None);
        let prior = TrackedItem::merged(&local, &remote_file("a.txt", "aa", "1"), at(3));
        let recreated = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(5), Some(at(5)));
        let old = TrackedItem::local_file(rel("a.txt"), 5, hash("aa"), at(1), Some(at(1)));

        assert!(recreated.created_after_sync(&prior));
        assert!(!old.created_after_sync(&prior));
    }

    #[test]
    fn test_detached_from_remote() {
        let item = remote_file("a.txt", "aa", "1").detached_from_remote();
        assert!(item.remote_id().is_none());
        assert!(item.revision().is_none());
        assert_eq!(item.hash(), Some(&hash("aa")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let item = remote_file("notes/plan.txt", "abcd", "3");
        let json = serde_json::to_string(&item).unwrap();
        let parsed: TrackedItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, parsed);
    }
}
