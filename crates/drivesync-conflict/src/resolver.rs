//! Conflict resolution
//!
//! Turns a [`ConflictRecord`] into the concrete [`Action`] that settles it:
//!
//! - `BothModified` / `BothCreated`: the strategy picks a winner; the loser
//!   is renamed to a conflict copy on its own side, then the winner is
//!   transferred to the original path
//! - `ModifiedDeleted`: the surviving edit is propagated to the side where
//!   the item was deleted
//! - `KindMismatch`: the file is renamed away on its side, then the
//!   directory is created there
//!
//! A losing version is always renamed, never removed. The renamed copy is
//! picked up as a new item by the next cycle's scan.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use drivesync_core::domain::{
    Action, ConflictKind, ConflictRecord, RelativePath, Resolution, Side, TrackedItem,
};

use crate::error::ConflictPolicyError;
use crate::namer::ConflictNamer;
use crate::policy::{PolicyEngine, Strategy};

/// A conflict with its outcome filled in, plus the action that applies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConflict {
    pub record: ConflictRecord,
    pub action: Action,
}

/// Resolves conflict records according to a [`PolicyEngine`]
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    policy: PolicyEngine,
}

impl ConflictResolver {
    pub fn new(policy: PolicyEngine) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Resolve one conflict
    ///
    /// `taken` reports whether a path is already in use on either side, so
    /// the conflict copy never overwrites an existing item.
    pub fn resolve<F>(
        &self,
        mut record: ConflictRecord,
        taken: F,
    ) -> Result<ResolvedConflict, ConflictPolicyError>
    where
        F: FnMut(&RelativePath) -> bool,
    {
        let path = record.path().clone();
        let local = record.local().cloned();
        let remote = record.remote().cloned();

        let (resolution, renamed_to, action) = match (record.kind(), local, remote) {
            (_, None, None) => return Err(ConflictPolicyError::NoCandidate(path)),

            (ConflictKind::ModifiedDeleted, Some(local), None) => {
                let action = if local.is_dir() {
                    Action::CreateRemoteDir(local)
                } else {
                    Action::Upload(local.detached_from_remote())
                };
                (Resolution::KeepLocal, None, action)
            }
            (ConflictKind::ModifiedDeleted, None, Some(remote)) => {
                let action = if remote.is_dir() {
                    Action::CreateLocalDir(remote)
                } else {
                    Action::Download(remote)
                };
                (Resolution::KeepRemote, None, action)
            }

            (ConflictKind::KindMismatch, Some(local), Some(remote)) => {
                self.resolve_kind_mismatch(&path, local, remote, taken)?
            }

            (ConflictKind::BothModified | ConflictKind::BothCreated, Some(local), Some(remote)) => {
                if !(local.is_file() && remote.is_file()) {
                    return Err(ConflictPolicyError::Unresolvable {
                        path,
                        reason: format!(
                            "expected two files, found local {} and remote {}",
                            local.kind(),
                            remote.kind()
                        ),
                    });
                }
                let strategy = self.policy.evaluate(path.as_str());
                self.resolve_divergent_edit(&path, strategy, local, remote, taken)?
            }

            (kind, local, remote) => {
                return Err(ConflictPolicyError::Unresolvable {
                    path,
                    reason: format!(
                        "{kind} with local {} and remote {}",
                        if local.is_some() { "present" } else { "absent" },
                        if remote.is_some() { "present" } else { "absent" }
                    ),
                })
            }
        };

        record.resolve(resolution, renamed_to.clone());
        info!(
            path = %path,
            kind = %record.kind(),
            resolution = %resolution,
            renamed_to = ?renamed_to.as_ref().map(|p| p.as_str()),
            "Conflict resolved"
        );

        Ok(ResolvedConflict { record, action })
    }

    fn resolve_divergent_edit<F>(
        &self,
        path: &RelativePath,
        strategy: Strategy,
        local: TrackedItem,
        remote: TrackedItem,
        taken: F,
    ) -> Result<(Resolution, Option<RelativePath>, Action), ConflictPolicyError>
    where
        F: FnMut(&RelativePath) -> bool,
    {
        let local_wins = match strategy {
            Strategy::PreferLocal => true,
            Strategy::PreferRemote => false,
            // Equal timestamps go to the remote
            Strategy::NewestWins => match (local.local_modified(), remote.remote_modified()) {
                (Some(l), Some(r)) => l > r,
                (Some(_), None) => true,
                _ => false,
            },
        };

        debug!(
            path = %path,
            strategy = %strategy,
            winner = if local_wins { "local" } else { "remote" },
            "Picked conflict winner"
        );

        if local_wins {
            let date = conflict_date(remote.remote_modified(), local.local_modified());
            let to = ConflictNamer::generate_unique(path, date, taken)?;
            let action = Action::Rename {
                side: Side::Remote,
                item: remote,
                to: to.clone(),
                then: Some(Box::new(Action::Upload(local.detached_from_remote()))),
            };
            Ok((Resolution::KeepBothRenamed, Some(to), action))
        } else {
            let date = conflict_date(local.local_modified(), remote.remote_modified());
            let to = ConflictNamer::generate_unique(path, date, taken)?;
            let action = Action::Rename {
                side: Side::Local,
                item: local,
                to: to.clone(),
                then: Some(Box::new(Action::Download(remote))),
            };
            Ok((Resolution::KeepBothRenamed, Some(to), action))
        }
    }

    fn resolve_kind_mismatch<F>(
        &self,
        path: &RelativePath,
        local: TrackedItem,
        remote: TrackedItem,
        taken: F,
    ) -> Result<(Resolution, Option<RelativePath>, Action), ConflictPolicyError>
    where
        F: FnMut(&RelativePath) -> bool,
    {
        match (local.is_file(), remote.is_file()) {
            // Local file, remote directory: the directory takes the path locally
            (true, false) => {
                let date = conflict_date(local.local_modified(), None);
                let to = ConflictNamer::generate_unique(path, date, taken)?;
                let action = Action::Rename {
                    side: Side::Local,
                    item: local,
                    to: to.clone(),
                    then: Some(Box::new(Action::CreateLocalDir(remote))),
                };
                Ok((Resolution::KeepBothRenamed, Some(to), action))
            }
            (false, true) => {
                let date = conflict_date(remote.remote_modified(), None);
                let to = ConflictNamer::generate_unique(path, date, taken)?;
                let action = Action::Rename {
                    side: Side::Remote,
                    item: remote,
                    to: to.clone(),
                    then: Some(Box::new(Action::CreateRemoteDir(local))),
                };
                Ok((Resolution::KeepBothRenamed, Some(to), action))
            }
            _ => Err(ConflictPolicyError::Unresolvable {
                path: path.clone(),
                reason: format!("both sides are a {}", local.kind()),
            }),
        }
    }
}

/// Date stamped into a conflict copy name: the loser's modification date
fn conflict_date(loser: Option<DateTime<Utc>>, fallback: Option<DateTime<Utc>>) -> NaiveDate {
    loser.or(fallback).unwrap_or_else(Utc::now).date_naive()
}
