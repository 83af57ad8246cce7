//! Transfer executor
//!
//! Runs the actions of a plan against both sides of a sync root.
//!
//! ## Scheduling
//!
//! ```text
//!   plan order ──► dependency graph ──► one task per action
//!                  (same / ancestor /        │ waits for its dependencies
//!                   descendant paths)        │ acquires a semaphore permit
//!                                            │ checks cancellation
//!                                            ▼
//!                                   perform ─► record in state store
//! ```
//!
//! Every action waits for the earlier actions on its own path, its
//! ancestors and its descendants, so directories are created before their
//! contents and removed after them. Independent paths run in parallel up to
//! the configured concurrency.
//!
//! ## Safety checks
//!
//! Local files are compared against the scan before they are overwritten,
//! uploaded or deleted; remote files are compared against the scan before
//! they are deleted. Anything that changed in between is skipped and picked
//! up by the next cycle.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use drivesync_core::domain::{
    Action, ActionKind, ItemKind, RelativePath, RemoteId, RevisionMarker, Side, SyncRoot,
    SyncRootId, TrackedItem,
};
use drivesync_core::ports::{ILocalFileSystem, IRemoteStore, IStateStore, RemoteError};

use crate::exclusion::ExclusionPolicy;
use crate::retry::{RetryError, RetryPolicy};
use crate::scanner::parse_entry_at;
use crate::TransferError;

// ============================================================================
// Outcomes and events
// ============================================================================

/// Result of one action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Both sides agree on the path; `update` is its new snapshot entry
    /// (a tombstone when the path is gone)
    Completed { action: Action, update: TrackedItem },
    /// The action failed permanently or ran out of retries
    Skipped { action: Action, error: TransferError },
    /// Cancellation was observed before or during the action
    Cancelled { action: Action },
    /// A directory deletion left alone because only excluded entries
    /// remain in it; its snapshot entry is kept
    Blocked { action: Action, reason: String },
}

impl ActionOutcome {
    pub fn action(&self) -> &Action {
        match self {
            Self::Completed { action, .. }
            | Self::Skipped { action, .. }
            | Self::Cancelled { action }
            | Self::Blocked { action, .. } => action,
        }
    }
}

/// Streamed to the caller while a plan executes
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Started { path: RelativePath, kind: ActionKind },
    Finished(ActionOutcome),
}

/// Per-run inputs shared by all action tasks
pub struct ExecutionContext {
    pub root: SyncRoot,
    /// Local scan results, used to detect edits made after the scan
    pub scanned_local: HashMap<RelativePath, TrackedItem>,
    /// Remote folder ids by path; folders created during the run are added
    pub folder_ids: DashMap<RelativePath, RemoteId>,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(root: SyncRoot, cancel: CancellationToken) -> Self {
        Self {
            root,
            scanned_local: HashMap::new(),
            folder_ids: DashMap::new(),
            cancel,
        }
    }

    /// Indexes the scan output of both sides
    #[must_use]
    pub fn with_scans(mut self, local: &[TrackedItem], remote: &[TrackedItem]) -> Self {
        self.scanned_local = local
            .iter()
            .map(|item| (item.path().clone(), item.clone()))
            .collect();
        for item in remote.iter().filter(|i| i.is_dir()) {
            if let Some(id) = item.remote_id() {
                self.folder_ids.insert(item.path().clone(), id.clone());
            }
        }
        self
    }

    fn local_path(&self, path: &RelativePath) -> std::path::PathBuf {
        path.to_local(self.root.local_path())
    }
}

/// Internal failure of one action
#[derive(Debug)]
enum Failure {
    Transfer(TransferError),
    Blocked(String),
    Cancelled,
}

impl From<TransferError> for Failure {
    fn from(err: TransferError) -> Self {
        Self::Transfer(err)
    }
}

impl From<RemoteError> for Failure {
    fn from(err: RemoteError) -> Self {
        Self::Transfer(err.into())
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::Transfer(err.into())
    }
}

impl<E: Into<TransferError>> From<RetryError<E>> for Failure {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Failed(e) => Self::Transfer(e.into()),
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

/// What the local path must look like before it is overwritten
#[derive(Clone, Copy)]
enum LocalExpectation<'a> {
    Absent,
    AsScanned(&'a TrackedItem),
}

// ============================================================================
// TransferExecutor
// ============================================================================

/// Executes action plans with bounded concurrency and retries
#[derive(Clone)]
pub struct TransferExecutor {
    local_fs: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    store: Arc<dyn IStateStore>,
    retry: RetryPolicy,
    concurrency: usize,
    exclusions: ExclusionPolicy,
}

impl TransferExecutor {
    pub fn new(
        local_fs: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        store: Arc<dyn IStateStore>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            local_fs,
            remote,
            store,
            retry,
            concurrency: concurrency.max(1),
            exclusions: ExclusionPolicy::default(),
        }
    }

    /// Entries the scans skip; they never count as directory content
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionPolicy) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Executes `actions`, returning one outcome per action in plan order
    ///
    /// `events`, when given, receives a `Started` and a `Finished` event for
    /// every action as it happens.
    #[instrument(skip_all, fields(root = %ctx.root.id(), actions = actions.len()))]
    pub async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        actions: Vec<Action>,
        events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
    ) -> Vec<ActionOutcome> {
        let total = actions.len();
        let deps = dependencies(&actions);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let (done_txs, done_rxs): (Vec<_>, Vec<_>) =
            (0..total).map(|_| watch::channel(false)).unzip();

        let mut tasks = JoinSet::new();
        for ((index, action), done) in actions.into_iter().enumerate().zip(done_txs) {
            let waits: Vec<watch::Receiver<bool>> =
                deps[index].iter().map(|&j| done_rxs[j].clone()).collect();
            let executor = self.clone();
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let events = events.clone();

            tasks.spawn(async move {
                for mut rx in waits {
                    // A dropped sender means the dependency's task died; go on
                    let _ = rx.wait_for(|finished| *finished).await;
                }

                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => executor.run_action(&ctx, action, events.as_ref()).await,
                    Err(_) => ActionOutcome::Cancelled { action },
                };
                let _ = done.send(true);
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!(error = %e, "Transfer task failed"),
            }
        }

        let outcomes: Vec<ActionOutcome> = outcomes.into_iter().flatten().collect();
        info!(
            completed = outcomes
                .iter()
                .filter(|o| matches!(o, ActionOutcome::Completed { .. }))
                .count(),
            total,
            "Plan executed"
        );
        outcomes
    }

    async fn run_action(
        &self,
        ctx: &ExecutionContext,
        action: Action,
        events: Option<&mpsc::UnboundedSender<ExecutorEvent>>,
    ) -> ActionOutcome {
        if ctx.cancel.is_cancelled() {
            return ActionOutcome::Cancelled { action };
        }

        let send = |event: ExecutorEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        send(ExecutorEvent::Started {
            path: action.path().clone(),
            kind: action.kind(),
        });
        debug!(action = %action, "Starting action");

        let outcome = match self.perform(ctx, &action).await {
            Ok(update) => {
                self.persist(ctx.root.id(), &update).await;
                ActionOutcome::Completed { action, update }
            }
            Err(Failure::Cancelled) => {
                info!(action = %action, "Action cancelled");
                ActionOutcome::Cancelled { action }
            }
            Err(Failure::Blocked(reason)) => {
                info!(action = %action, reason = %reason, "Deletion blocked by excluded entries");
                ActionOutcome::Blocked { action, reason }
            }
            Err(Failure::Transfer(error)) => {
                warn!(action = %action, error = %error, "Action skipped");
                ActionOutcome::Skipped { action, error }
            }
        };

        send(ExecutorEvent::Finished(outcome.clone()));
        outcome
    }

    /// Records a confirmed transfer; a failure here does not undo it
    async fn persist(&self, root: &SyncRootId, update: &TrackedItem) {
        let result = if update.is_deleted() {
            self.store.remove_item(root, update.path()).await
        } else {
            self.store.record_item(root, update).await
        };
        if let Err(e) = result {
            warn!(path = %update.path(), error = %e, "Failed to record transfer in state store");
        }
    }

    async fn perform(&self, ctx: &ExecutionContext, action: &Action) -> Result<TrackedItem, Failure> {
        match action {
            Action::Rename {
                side,
                item,
                to,
                then,
            } => {
                self.rename(ctx, *side, item, to).await?;
                match then.as_deref() {
                    // The loser has moved away, so the path is expected empty
                    Some(next) => self.perform_step(ctx, next, LocalExpectation::Absent).await,
                    None => Ok(TrackedItem::tombstone(item.path().clone(), item.kind())),
                }
            }
            other => {
                let expectation = match ctx.scanned_local.get(other.path()) {
                    Some(scanned) => LocalExpectation::AsScanned(scanned),
                    None => LocalExpectation::Absent,
                };
                self.perform_step(ctx, other, expectation).await
            }
        }
    }

    async fn perform_step(
        &self,
        ctx: &ExecutionContext,
        action: &Action,
        expectation: LocalExpectation<'_>,
    ) -> Result<TrackedItem, Failure> {
        match action {
            Action::Upload(item) => self.upload(ctx, item).await,
            Action::Download(item) => self.download(ctx, item, expectation).await,
            Action::DeleteLocal(item) => self.delete_local(ctx, item).await,
            Action::DeleteRemote(item) => self.delete_remote(ctx, item).await,
            Action::CreateLocalDir(item) => self.create_local_dir(ctx, item).await,
            Action::CreateRemoteDir(item) => self.create_remote_dir(ctx, item).await,
            Action::NoOp { path, settled } => Ok(settled
                .clone()
                .unwrap_or_else(|| TrackedItem::tombstone(path.clone(), ItemKind::File))),
            Action::Rename { .. } => Err(TransferError::permanent("nested rename").into()),
            Action::Conflict(_) => Err(TransferError::permanent("unresolved conflict").into()),
        }
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    async fn download(
        &self,
        ctx: &ExecutionContext,
        item: &TrackedItem,
        expectation: LocalExpectation<'_>,
    ) -> Result<TrackedItem, Failure> {
        let id = require_remote_id(item)?;
        let target = ctx.local_path(item.path());

        let data = self
            .retry
            .run("download", &ctx.cancel, || async {
                let data = self.remote.download(id).await?;
                self.verify(item, &data)?;
                Ok::<_, TransferError>(data)
            })
            .await?;

        self.check_local(&target, expectation).await?;
        self.local_fs.write_file(&target, &data).await?;
        let state = self.local_fs.stat(&target).await?;

        let hash = self.local_fs.hash_bytes(&data);
        let local = TrackedItem::local_file(
            item.path().clone(),
            data.len() as u64,
            hash,
            state.modified.unwrap_or_else(Utc::now),
            None,
        );
        debug!(path = %item.path(), bytes = data.len(), "Downloaded");
        Ok(TrackedItem::merged(&local, item, Utc::now()))
    }

    /// Checks received bytes against the listing; a mismatch is retried
    fn verify(&self, item: &TrackedItem, data: &[u8]) -> Result<(), TransferError> {
        if data.len() as u64 != item.size() {
            return Err(TransferError::transient(format!(
                "size mismatch for {}: expected {}, received {}",
                item.path(),
                item.size(),
                data.len()
            )));
        }
        let actual = self.local_fs.hash_bytes(data);
        if item.hash() != Some(&actual) {
            return Err(TransferError::transient(format!(
                "hash mismatch for {}: received {actual}",
                item.path()
            )));
        }
        Ok(())
    }

    /// Refuses to touch a local path that changed since the scan
    async fn check_local(
        &self,
        target: &Path,
        expectation: LocalExpectation<'_>,
    ) -> Result<(), TransferError> {
        let state = self.local_fs.stat(target).await?;
        match expectation {
            LocalExpectation::Absent if state.exists => Err(TransferError::permanent(format!(
                "{} appeared locally after the scan",
                target.display()
            ))),
            LocalExpectation::Absent => Ok(()),
            LocalExpectation::AsScanned(scanned) => {
                let unchanged = if scanned.is_dir() {
                    state.is_directory()
                } else {
                    state.is_regular_file()
                        && state.size == scanned.size()
                        && state.modified == scanned.local_modified()
                };
                if unchanged {
                    Ok(())
                } else {
                    Err(TransferError::permanent(format!(
                        "{} changed locally since the scan",
                        target.display()
                    )))
                }
            }
        }
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    async fn upload(&self, ctx: &ExecutionContext, item: &TrackedItem) -> Result<TrackedItem, Failure> {
        let source = ctx.local_path(item.path());
        self.check_local(&source, LocalExpectation::AsScanned(item))
            .await?;

        let data = self.local_fs.read_file(&source).await?;
        let hash = self.local_fs.hash_bytes(&data);
        if item.hash() != Some(&hash) {
            return Err(TransferError::permanent(format!(
                "{} changed locally since the scan",
                item.path()
            ))
            .into());
        }

        let parent = match item.remote_id() {
            Some(_) => None,
            None => Some(parent_folder(ctx, item.path())?),
        };
        let size = data.len() as u64;

        // Overwrite target: the existing file, or the copy created by a
        // previous attempt whose content failed verification
        let target: Mutex<Option<(RemoteId, Option<RevisionMarker>)>> = Mutex::new(
            item.remote_id()
                .cloned()
                .map(|id| (id, item.revision().cloned())),
        );

        let remote = self
            .retry
            .run("upload", &ctx.cancel, || async {
                let current = lock(&target).clone();
                let entry = match (current, &parent) {
                    (Some((id, revision)), _) => {
                        self.remote
                            .update_file(&id, data.clone(), revision.as_ref())
                            .await?
                    }
                    (None, Some(parent)) => {
                        self.remote
                            .create_file(parent, item.path().file_name(), data.clone())
                            .await?
                    }
                    (None, None) => return Err(TransferError::permanent("no upload target")),
                };

                let remote = parse_entry_at(&entry, item.path().clone())
                    .map_err(|e| TransferError::permanent(format!("invalid upload response: {e}")))?;
                if remote.size() != size || remote.hash() != Some(&hash) {
                    *lock(&target) = remote
                        .remote_id()
                        .cloned()
                        .map(|id| (id, remote.revision().cloned()));
                    return Err(TransferError::transient(format!(
                        "remote copy of {} does not match the upload",
                        item.path()
                    )));
                }
                Ok(remote)
            })
            .await?;

        debug!(path = %item.path(), bytes = size, "Uploaded");
        Ok(TrackedItem::merged(item, &remote, Utc::now()))
    }

    // ========================================================================
    // Deletions
    // ========================================================================

    async fn delete_local(
        &self,
        ctx: &ExecutionContext,
        item: &TrackedItem,
    ) -> Result<TrackedItem, Failure> {
        let target = ctx.local_path(item.path());
        let state = self.local_fs.stat(&target).await?;

        if state.exists {
            self.check_local(&target, LocalExpectation::AsScanned(item))
                .await?;
            if item.is_dir() {
                let children = self.local_fs.list_dir(&target).await?;
                self.check_leftovers(item.path(), children.into_iter().map(|c| c.name).collect())?;
                self.local_fs.remove_dir(&target).await?;
            } else {
                self.local_fs.delete_file(&target).await?;
            }
            debug!(path = %item.path(), "Deleted locally");
        }

        Ok(TrackedItem::tombstone(item.path().clone(), item.kind()))
    }

    async fn delete_remote(
        &self,
        ctx: &ExecutionContext,
        item: &TrackedItem,
    ) -> Result<TrackedItem, Failure> {
        let id = require_remote_id(item)?;

        if item.is_file() {
            let entry = self
                .retry
                .run("get_item", &ctx.cancel, || self.remote.get_item(id))
                .await?;
            let changed = entry.revision.as_deref() != item.revision().map(|r| r.as_str())
                || entry.hash.as_deref().map(str::to_ascii_lowercase).as_deref()
                    != item.hash().map(|h| h.as_str());
            if changed {
                return Err(TransferError::permanent(format!(
                    "{} changed remotely since the scan",
                    item.path()
                ))
                .into());
            }
        } else {
            let children = self.remote_child_names(ctx, id).await?;
            self.check_leftovers(item.path(), children)?;
        }

        self.retry
            .run("delete", &ctx.cancel, || self.remote.delete(id))
            .await?;
        debug!(path = %item.path(), "Deleted remotely");
        Ok(TrackedItem::tombstone(item.path().clone(), item.kind()))
    }

    /// Names in a remote folder, across all pages
    async fn remote_child_names(
        &self,
        ctx: &ExecutionContext,
        folder: &RemoteId,
    ) -> Result<Vec<String>, Failure> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .retry
                .run("list_children", &ctx.cancel, || {
                    self.remote.list_children(folder, token.as_deref())
                })
                .await?;
            names.extend(
                page.entries
                    .into_iter()
                    .filter(|e| !e.trashed)
                    .filter_map(|e| e.name),
            );
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(names),
            }
        }
    }

    /// Fails with [`Failure::Blocked`] when every entry left in the
    /// directory at `path` is excluded from sync
    ///
    /// Any other leftover lets the deletion proceed and fail on its own.
    fn check_leftovers(&self, path: &RelativePath, mut names: Vec<String>) -> Result<(), Failure> {
        if names.is_empty() {
            return Ok(());
        }
        let all_excluded = names.iter().all(|name| {
            path.join(name)
                .map(|child| self.exclusions.is_excluded(&child))
                .unwrap_or(false)
        });
        if !all_excluded {
            return Ok(());
        }
        names.sort();
        Err(Failure::Blocked(format!(
            "{path} still holds excluded entries ({})",
            names.join(", ")
        )))
    }

    // ========================================================================
    // Directories and renames
    // ========================================================================

    async fn create_local_dir(
        &self,
        ctx: &ExecutionContext,
        item: &TrackedItem,
    ) -> Result<TrackedItem, Failure> {
        let target = ctx.local_path(item.path());
        self.local_fs.create_dir_all(&target).await?;
        let state = self.local_fs.stat(&target).await?;

        if let Some(id) = item.remote_id() {
            ctx.folder_ids.insert(item.path().clone(), id.clone());
        }

        let local = TrackedItem::local_dir(
            item.path().clone(),
            state.modified.unwrap_or_else(Utc::now),
            None,
        );
        Ok(TrackedItem::merged(&local, item, Utc::now()))
    }

    async fn create_remote_dir(
        &self,
        ctx: &ExecutionContext,
        item: &TrackedItem,
    ) -> Result<TrackedItem, Failure> {
        let parent = parent_folder(ctx, item.path())?;
        let name = item.path().file_name();

        // A folder left behind by an interrupted run is reused
        let existing = self
            .retry
            .run("find_folder", &ctx.cancel, || {
                self.remote.find_folder(&parent, name)
            })
            .await?;
        let entry = match existing {
            Some(entry) => entry,
            None => {
                self.retry
                    .run("create_folder", &ctx.cancel, || {
                        self.remote.create_folder(&parent, name)
                    })
                    .await?
            }
        };

        let remote = parse_entry_at(&entry, item.path().clone())
            .map_err(|e| TransferError::permanent(format!("invalid folder response: {e}")))?;
        if let Some(id) = remote.remote_id() {
            ctx.folder_ids.insert(item.path().clone(), id.clone());
        }
        Ok(TrackedItem::merged(item, &remote, Utc::now()))
    }

    async fn rename(
        &self,
        ctx: &ExecutionContext,
        side: Side,
        item: &TrackedItem,
        to: &RelativePath,
    ) -> Result<(), Failure> {
        match side {
            Side::Local => {
                let from = ctx.local_path(item.path());
                let to_path = ctx.local_path(to);
                self.local_fs.rename(&from, &to_path).await?;
            }
            Side::Remote => {
                let id = require_remote_id(item)?;
                self.retry
                    .run("rename", &ctx.cancel, || {
                        self.remote.rename(id, to.file_name())
                    })
                    .await?;
            }
        }
        info!(side = %side, from = %item.path(), to = %to, "Moved conflict loser aside");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn require_remote_id(item: &TrackedItem) -> Result<&RemoteId, TransferError> {
    item.remote_id()
        .ok_or_else(|| TransferError::permanent(format!("{} has no remote id", item.path())))
}

/// Remote folder that holds `path`
fn parent_folder(ctx: &ExecutionContext, path: &RelativePath) -> Result<RemoteId, TransferError> {
    match path.parent() {
        None => Ok(ctx.root.remote_folder().clone()),
        Some(parent) => ctx
            .folder_ids
            .get(&parent)
            .map(|id| id.value().clone())
            .ok_or_else(|| {
                TransferError::permanent(format!("remote folder {parent} does not exist"))
            }),
    }
}

/// For each action, the earlier actions it must wait for
///
/// An action depends on the latest earlier action touching the same path
/// or one of its ancestors, and on every earlier action below it.
pub(crate) fn dependencies(actions: &[Action]) -> Vec<Vec<usize>> {
    let mut last_on: HashMap<RelativePath, usize> = HashMap::new();
    let mut below: HashMap<RelativePath, Vec<usize>> = HashMap::new();
    let mut deps = Vec::with_capacity(actions.len());

    for (index, action) in actions.iter().enumerate() {
        let paths: Vec<RelativePath> = action.paths().into_iter().cloned().collect();
        let mut mine = BTreeSet::new();

        for path in &paths {
            if let Some(&j) = last_on.get(path) {
                mine.insert(j);
            }
            for ancestor in path.ancestors() {
                if let Some(&j) = last_on.get(&ancestor) {
                    mine.insert(j);
                }
            }
            if let Some(descendants) = below.get(path) {
                mine.extend(descendants.iter().copied());
            }
        }

        for path in paths {
            for ancestor in path.ancestors() {
                below.entry(ancestor).or_default().push(index);
            }
            last_on.insert(path, index);
        }

        deps.push(mine.into_iter().collect());
    }

    deps
}
