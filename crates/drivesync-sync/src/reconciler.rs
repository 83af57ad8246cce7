//! Reconciler - three-way diff of local, remote and prior state
//!
//! Pure with respect to external state: it reads a [`ChangeSet`] and returns
//! an ordered [`ActionPlan`].
//!
//! | local | remote | prior | outcome                                           |
//! |-------|--------|-------|---------------------------------------------------|
//! | yes   | yes    | yes   | NoOp, Upload, Download or Conflict(BothModified)  |
//! | yes   | no     | no    | Upload / CreateRemoteDir                          |
//! | no    | yes    | no    | Download / CreateLocalDir                         |
//! | no    | no     | yes   | NoOp, dropping the entry                          |
//! | yes   | no     | yes   | DeleteLocal, or Conflict(ModifiedDeleted)         |
//! | no    | yes    | yes   | DeleteRemote, or Conflict(ModifiedDeleted)        |
//! | yes   | yes    | no    | NoOp if identical, else Conflict(BothCreated)     |
//!
//! A file on one side and a directory on the other is always
//! `Conflict(KindMismatch)`.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use drivesync_core::domain::{
    Action, ActionPlan, ChangeSet, ConflictKind, ConflictRecord, RelativePath, TrackedItem,
};

#[derive(Default)]
struct Sides<'a> {
    local: Option<&'a TrackedItem>,
    remote: Option<&'a TrackedItem>,
    prior: Option<&'a TrackedItem>,
}

/// Classifies every path of the change set into one action
pub fn reconcile(changes: &ChangeSet) -> ActionPlan {
    let mut by_path: BTreeMap<&RelativePath, Sides<'_>> = BTreeMap::new();

    for item in &changes.local {
        by_path.entry(item.path()).or_default().local = Some(item);
    }
    for item in &changes.remote {
        by_path.entry(item.path()).or_default().remote = Some(item);
    }
    for item in changes.prior.iter() {
        by_path.entry(item.path()).or_default().prior = Some(item);
    }

    let actions = by_path
        .into_iter()
        .map(|(path, sides)| classify(path, sides, changes));

    let plan = ActionPlan::from_actions(actions);
    debug!(
        actions = plan.actions().len(),
        conflicts = plan.stats().conflicts,
        "Reconciled change set"
    );
    plan
}

fn classify(path: &RelativePath, sides: Sides<'_>, changes: &ChangeSet) -> Action {
    let settled = |local: &TrackedItem, remote: &TrackedItem| Action::NoOp {
        path: path.clone(),
        settled: Some(TrackedItem::merged(local, remote, changes.scanned_at)),
    };
    let conflict = |kind: ConflictKind, sides: &Sides| {
        Action::Conflict(ConflictRecord::new(
            path.clone(),
            kind,
            sides.local.cloned(),
            sides.remote.cloned(),
            sides.prior.cloned(),
        ))
    };

    match (sides.local, sides.remote, sides.prior) {
        (None, None, _) => Action::NoOp {
            path: path.clone(),
            settled: None,
        },

        (Some(local), None, None) => {
            if local.is_dir() {
                Action::CreateRemoteDir(local.clone())
            } else {
                Action::Upload(local.clone())
            }
        }

        (None, Some(remote), None) => {
            if remote.is_dir() {
                Action::CreateLocalDir(remote.clone())
            } else {
                Action::Download(remote.clone())
            }
        }

        (Some(local), Some(remote), None) => {
            if local.kind() != remote.kind() {
                conflict(ConflictKind::KindMismatch, &sides)
            } else if local.same_content(remote) {
                settled(local, remote)
            } else {
                conflict(ConflictKind::BothCreated, &sides)
            }
        }

        (Some(local), Some(remote), Some(prior)) => {
            if local.kind() != remote.kind() {
                return conflict(ConflictKind::KindMismatch, &sides);
            }
            if local.same_content(remote) {
                return settled(local, remote);
            }

            match (
                local.local_changed_since(prior),
                remote.remote_changed_since(prior),
            ) {
                (true, false) => {
                    // Overwrite the existing remote file, conditional on its revision
                    let mut upload = local.clone();
                    upload.set_remote_id(remote.remote_id().cloned());
                    upload.set_revision(remote.revision().cloned());
                    upload.set_remote_modified(remote.remote_modified());
                    Action::Upload(upload)
                }
                (false, true) => Action::Download(remote.clone()),
                (true, true) => conflict(ConflictKind::BothModified, &sides),
                // Same hashes as prior yet different from each other cannot
                // happen with a consistent snapshot; let the remote decide
                (false, false) => Action::Download(remote.clone()),
            }
        }

        (Some(local), None, Some(prior)) => {
            if local.kind() != prior.kind()
                || local.local_changed_since(prior)
                || local.created_after_sync(prior)
            {
                conflict(ConflictKind::ModifiedDeleted, &sides)
            } else {
                Action::DeleteLocal(local.clone())
            }
        }

        (None, Some(remote), Some(prior)) => {
            if remote.kind() != prior.kind()
                || remote.remote_changed_since(prior)
                || remote.created_after_sync(prior)
            {
                conflict(ConflictKind::ModifiedDeleted, &sides)
            } else {
                Action::DeleteRemote(remote.clone())
            }
        }
    }
}

/// Turns directory deletions that would orphan incoming items into creations
///
/// Runs after conflict resolution, when the plan may contain uploads and
/// downloads into directories the other side removed. Such a deletion is
/// replaced by re-creating the directory on the side where it disappeared,
/// so nothing is ever sent into a directory that is being removed.
pub fn restore_parents(plan: &mut ActionPlan) {
    let mut needed_remote: HashSet<RelativePath> = HashSet::new();
    let mut needed_local: HashSet<RelativePath> = HashSet::new();

    for action in plan.actions() {
        collect_needed(action, &mut needed_local, &mut needed_remote);
    }

    if needed_local.is_empty() && needed_remote.is_empty() {
        return;
    }

    let mut restored = 0usize;
    for action in plan.actions_mut() {
        let replacement = match action {
            Action::DeleteLocal(item) if item.is_dir() && needed_remote.contains(item.path()) => {
                Some(Action::CreateRemoteDir(item.clone()))
            }
            Action::DeleteRemote(item) if item.is_dir() && needed_local.contains(item.path()) => {
                Some(Action::CreateLocalDir(item.clone()))
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            debug!(path = %replacement.path(), "Restoring directory instead of deleting it");
            *action = replacement;
            restored += 1;
        }
    }

    if restored > 0 {
        plan.order();
        plan.refresh_stats();
    }
}

/// Records the ancestors each side must keep for `action` to succeed
fn collect_needed(
    action: &Action,
    needed_local: &mut HashSet<RelativePath>,
    needed_remote: &mut HashSet<RelativePath>,
) {
    let (path, side_needs) = match action {
        Action::Upload(item) | Action::CreateRemoteDir(item) => (item.path(), &mut *needed_remote),
        Action::Download(item) | Action::CreateLocalDir(item) => (item.path(), &mut *needed_local),
        Action::Rename { then: Some(next), .. } => {
            collect_needed(next, needed_local, needed_remote);
            return;
        }
        _ => return,
    };
    side_needs.extend(path.ancestors());
}
