//! Sync actions and action plans
//!
//! The reconciler turns a change set into an [`ActionPlan`]: an ordered list
//! of [`Action`]s where directories are created before their contents and
//! deleted after them. Conflict actions are replaced by concrete actions
//! before the plan reaches the transfer executor.

use std::cmp::Reverse;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::conflict::ConflictRecord;
use super::newtypes::RelativePath;
use super::tracked_item::TrackedItem;

/// Which side of a sync root an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

// ============================================================================
// Action
// ============================================================================

/// One step of a sync plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Send the local file to the remote (create or overwrite)
    Upload(TrackedItem),
    /// Fetch the remote file into the local tree (create or overwrite)
    Download(TrackedItem),
    /// Remove the local item
    DeleteLocal(TrackedItem),
    /// Remove the remote item
    DeleteRemote(TrackedItem),
    /// Create a local directory mirroring a remote one
    CreateLocalDir(TrackedItem),
    /// Create a remote directory mirroring a local one
    CreateRemoteDir(TrackedItem),
    /// Move an item aside on one side, then optionally run a follow-up
    Rename {
        side: Side,
        item: TrackedItem,
        to: RelativePath,
        then: Option<Box<Action>>,
    },
    /// Divergent edits awaiting a decision
    Conflict(ConflictRecord),
    /// Nothing to transfer; `settled` is the refreshed snapshot entry, or
    /// `None` when the path should be dropped from the state
    NoOp {
        path: RelativePath,
        settled: Option<TrackedItem>,
    },
}

/// Discriminant of [`Action`], used for counting and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    CreateLocalDir,
    CreateRemoteDir,
    Rename,
    Conflict,
    NoOp,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::DeleteLocal => "delete_local",
            Self::DeleteRemote => "delete_remote",
            Self::CreateLocalDir => "create_local_dir",
            Self::CreateRemoteDir => "create_remote_dir",
            Self::Rename => "rename",
            Self::Conflict => "conflict",
            Self::NoOp => "no_op",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Action {
    /// The primary path this action operates on
    pub fn path(&self) -> &RelativePath {
        match self {
            Self::Upload(item)
            | Self::Download(item)
            | Self::DeleteLocal(item)
            | Self::DeleteRemote(item)
            | Self::CreateLocalDir(item)
            | Self::CreateRemoteDir(item) => item.path(),
            Self::Rename { item, .. } => item.path(),
            Self::Conflict(record) => record.path(),
            Self::NoOp { path, .. } => path,
        }
    }

    /// Every path this action reads or writes, including rename targets
    pub fn paths(&self) -> Vec<&RelativePath> {
        match self {
            Self::Rename { item, to, then, .. } => {
                let mut paths = vec![item.path(), to];
                if let Some(next) = then {
                    for path in next.paths() {
                        if !paths.contains(&path) {
                            paths.push(path);
                        }
                    }
                }
                paths
            }
            other => vec![other.path()],
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Upload(_) => ActionKind::Upload,
            Self::Download(_) => ActionKind::Download,
            Self::DeleteLocal(_) => ActionKind::DeleteLocal,
            Self::DeleteRemote(_) => ActionKind::DeleteRemote,
            Self::CreateLocalDir(_) => ActionKind::CreateLocalDir,
            Self::CreateRemoteDir(_) => ActionKind::CreateRemoteDir,
            Self::Rename { .. } => ActionKind::Rename,
            Self::Conflict(_) => ActionKind::Conflict,
            Self::NoOp { .. } => ActionKind::NoOp,
        }
    }

    /// True for actions that touch either side
    pub fn is_transfer(&self) -> bool {
        !matches!(self, Self::NoOp { .. } | Self::Conflict(_))
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::DeleteLocal(_) | Self::DeleteRemote(_))
    }

    /// Bytes this action moves over the wire
    pub fn transfer_bytes(&self) -> u64 {
        match self {
            Self::Upload(item) | Self::Download(item) => item.size(),
            Self::Rename {
                then: Some(next), ..
            } => next.transfer_bytes(),
            _ => 0,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rename { side, item, to, .. } => {
                write!(f, "rename {side} {} -> {to}", item.path())
            }
            other => write!(f, "{} {}", other.kind(), other.path()),
        }
    }
}

// ============================================================================
// ActionPlan
// ============================================================================

/// Counters describing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub uploads: usize,
    pub downloads: usize,
    pub local_deletes: usize,
    pub remote_deletes: usize,
    pub dirs_to_create: usize,
    pub renames: usize,
    pub conflicts: usize,
    pub unchanged: usize,
    /// Bytes to upload and download combined
    pub total_bytes: u64,
}

impl PlanStats {
    /// Number of actions that touch either side
    pub fn transfers(&self) -> usize {
        self.uploads
            + self.downloads
            + self.local_deletes
            + self.remote_deletes
            + self.dirs_to_create
            + self.renames
    }
}

/// Ordered actions for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    actions: Vec<Action>,
    stats: PlanStats,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from actions, recomputing stats and ordering
    pub fn from_actions(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut plan = Self::new();
        for action in actions {
            plan.push(action);
        }
        plan.order();
        plan
    }

    /// Append an action and update the counters
    pub fn push(&mut self, action: Action) {
        Self::count(&mut self.stats, &action);
        self.actions.push(action);
    }

    fn count(stats: &mut PlanStats, action: &Action) {
        stats.total_bytes += action.transfer_bytes();
        match action {
            Action::Upload(_) => stats.uploads += 1,
            Action::Download(_) => stats.downloads += 1,
            Action::DeleteLocal(_) => stats.local_deletes += 1,
            Action::DeleteRemote(_) => stats.remote_deletes += 1,
            Action::CreateLocalDir(_) | Action::CreateRemoteDir(_) => stats.dirs_to_create += 1,
            Action::Rename { .. } => stats.renames += 1,
            Action::Conflict(_) => stats.conflicts += 1,
            Action::NoOp { .. } => stats.unchanged += 1,
        }
    }

    /// Sort so parents are created before children and deleted after them
    ///
    /// Non-deletions come first in ascending path order, then deletions in
    /// descending path order. The sort is stable.
    pub fn order(&mut self) {
        self.actions.sort_by(|a, b| {
            let key = |action: &Action| {
                if action.is_deletion() {
                    (1u8, None, Some(Reverse(action.path().clone())))
                } else {
                    (0u8, Some(action.path().clone()), None)
                }
            };
            key(a).cmp(&key(b))
        });
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut Vec<Action> {
        &mut self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    /// Recount after the action list was edited in place
    pub fn refresh_stats(&mut self) {
        let mut stats = PlanStats::default();
        for action in &self.actions {
            Self::count(&mut stats, action);
        }
        self.stats = stats;
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions that will touch either side
    pub fn transfer_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_transfer()).count()
    }
}
