//! Conflict records
//!
//! A [`ConflictRecord`] describes one path that changed incompatibly on
//! both sides since the last agreed state. The reconciler creates it with
//! no resolution; the conflict resolver fills in the [`Resolution`] and,
//! for keep-both outcomes, the path the losing version was moved to.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::newtypes::RelativePath;
use super::tracked_item::TrackedItem;

/// Why a path is in conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited a previously synced file
    BothModified,
    /// Both sides created an item at a path unknown to the prior state
    BothCreated,
    /// One side deleted the item while the other edited or re-created it
    ModifiedDeleted,
    /// The item is a file on one side and a directory on the other
    KindMismatch,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BothModified => "both_modified",
            Self::BothCreated => "both_created",
            Self::ModifiedDeleted => "modified_deleted",
            Self::KindMismatch => "kind_mismatch",
        };
        write!(f, "{name}")
    }
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The local version is propagated to the remote
    KeepLocal,
    /// The remote version is propagated to local
    KeepRemote,
    /// The loser is renamed aside and the winner takes the original path
    KeepBothRenamed,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::KeepBothRenamed => "keep_both_renamed",
        };
        write!(f, "{name}")
    }
}

/// A path that diverged on both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    path: RelativePath,
    kind: ConflictKind,
    local: Option<TrackedItem>,
    remote: Option<TrackedItem>,
    prior: Option<TrackedItem>,
    resolution: Option<Resolution>,
    renamed_to: Option<RelativePath>,
}

impl ConflictRecord {
    pub fn new(
        path: RelativePath,
        kind: ConflictKind,
        local: Option<TrackedItem>,
        remote: Option<TrackedItem>,
        prior: Option<TrackedItem>,
    ) -> Self {
        Self {
            path,
            kind,
            local,
            remote,
            prior,
            resolution: None,
            renamed_to: None,
        }
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn kind(&self) -> ConflictKind {
        self.kind
    }

    pub fn local(&self) -> Option<&TrackedItem> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&TrackedItem> {
        self.remote.as_ref()
    }

    pub fn prior(&self) -> Option<&TrackedItem> {
        self.prior.as_ref()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn renamed_to(&self) -> Option<&RelativePath> {
        self.renamed_to.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record the outcome chosen by the resolver
    pub fn resolve(&mut self, resolution: Resolution, renamed_to: Option<RelativePath>) {
        self.resolution = Some(resolution);
        self.renamed_to = renamed_to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_unresolved() {
        let record = ConflictRecord::new(
            RelativePath::new("a.txt".into()).unwrap(),
            ConflictKind::BothModified,
            None,
            None,
            None,
        );
        assert!(!record.is_resolved());
        assert!(record.renamed_to().is_none());
    }

    #[test]
    fn test_resolve_sets_outcome() {
        let mut record = ConflictRecord::new(
            RelativePath::new("a.txt".into()).unwrap(),
            ConflictKind::BothModified,
            None,
            None,
            None,
        );
        let renamed = RelativePath::new("a (conflicted 2024-01-01).txt".into()).unwrap();
        record.resolve(Resolution::KeepBothRenamed, Some(renamed.clone()));
        assert_eq!(record.resolution(), Some(Resolution::KeepBothRenamed));
        assert_eq!(record.renamed_to(), Some(&renamed));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Resolution::KeepBothRenamed.to_string(), "keep_both_renamed");
        assert_eq!(ConflictKind::ModifiedDeleted.to_string(), "modified_deleted");
    }
}
