//! Persisted sync state and per-cycle change sets
//!
//! [`SyncState`] is the last-agreed snapshot of one sync root: a map from
//! path to merged [`TrackedItem`]. It is passed explicitly through a cycle
//! (load, reconcile, execute, commit) and never held in a global.
//!
//! [`ChangeSet`] bundles the three inputs of a reconciliation: the current
//! local scan, the current remote scan, and the prior state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RelativePath;
use super::tracked_item::TrackedItem;

/// Current version of the persisted snapshot layout
pub const SCHEMA_VERSION: u32 = 1;

/// Last-synchronized snapshot of one sync root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    schema_version: u32,
    committed_at: Option<DateTime<Utc>>,
    items: BTreeMap<RelativePath, TrackedItem>,
}

impl SyncState {
    /// Empty state, as seen on first run
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            committed_at: None,
            items: BTreeMap::new(),
        }
    }

    /// Build a state from an iterator of items; later duplicates replace earlier ones
    pub fn from_items(items: impl IntoIterator<Item = TrackedItem>) -> Self {
        let mut state = Self::empty();
        for item in items {
            state.insert(item);
        }
        state
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    pub fn set_committed_at(&mut self, at: DateTime<Utc>) {
        self.committed_at = Some(at);
    }

    pub fn get(&self, path: &RelativePath) -> Option<&TrackedItem> {
        self.items.get(path)
    }

    pub fn contains(&self, path: &RelativePath) -> bool {
        self.items.contains_key(path)
    }

    /// Insert or replace the entry at the item's path
    pub fn insert(&mut self, item: TrackedItem) -> Option<TrackedItem> {
        self.items.insert(item.path().clone(), item)
    }

    pub fn remove(&mut self, path: &RelativePath) -> Option<TrackedItem> {
        self.items.remove(path)
    }

    /// Apply an incremental record: tombstones remove, everything else upserts
    pub fn apply(&mut self, item: TrackedItem) {
        if item.is_deleted() {
            self.items.remove(item.path());
        } else {
            self.insert(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = &TrackedItem> {
        self.items.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &RelativePath> {
        self.items.keys()
    }

    pub fn into_items(self) -> Vec<TrackedItem> {
        self.items.into_values().collect()
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::empty()
    }
}

/// Inputs of one reconciliation, rebuilt every cycle
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Current local items, ordered by path
    pub local: Vec<TrackedItem>,
    /// Current remote items, ordered by path
    pub remote: Vec<TrackedItem>,
    /// Last committed state
    pub prior: SyncState,
    /// When the scans completed; stamped on settled entries
    pub scanned_at: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(
        local: Vec<TrackedItem>,
        remote: Vec<TrackedItem>,
        prior: SyncState,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local,
            remote,
            prior,
            scanned_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::newtypes::ContentHash;
    use crate::domain::tracked_item::ItemKind;

    fn item(path: &str) -> TrackedItem {
        TrackedItem::local_file(
            RelativePath::new(path.to_string()).unwrap(),
            1,
            ContentHash::new("aa".to_string()).unwrap(),
            Utc::now(),
            None,
        )
    }

    #[test]
    fn test_empty_state() {
        let state = SyncState::empty();
        assert!(state.is_empty());
        assert_eq!(state.schema_version(), SCHEMA_VERSION);
        assert!(state.committed_at().is_none());
    }

    #[test]
    fn test_one_entry_per_path() {
        let mut state = SyncState::empty();
        assert!(state.insert(item("a.txt")).is_none());
        assert!(state.insert(item("a.txt")).is_some());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_apply_tombstone_removes() {
        let mut state = SyncState::from_items(vec![item("a.txt"), item("b.txt")]);
        let path = RelativePath::new("a.txt".into()).unwrap();
        state.apply(TrackedItem::tombstone(path.clone(), ItemKind::File));
        assert!(!state.contains(&path));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_iteration_is_path_ordered() {
        let state = SyncState::from_items(vec![item("c"), item("a/b"), item("a")]);
        let paths: Vec<_> = state.paths().map(|p| p.as_str().to_string()).collect();
        assert_eq!(paths, vec!["a", "a/b", "c"]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = SyncState::from_items(vec![item("x/y.txt")]);
        state.set_committed_at(Utc::now());
        let json = serde_json::to_string(&state).unwrap();
        let parsed: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, parsed);
    }
}
