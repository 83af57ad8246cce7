//! Sync orchestrator
//!
//! Drives one cycle per sync root end-to-end:
//!
//! ```text
//!   Idle ─► Scanning ─► Reconciling ─► Resolving ─► Executing ─► Committing ─► Idle
//!              │             │              │            │
//!              └─────────────┴──────────────┴────────────┴──► Cancelling ─► Committing
//! ```
//!
//! The prior state is loaded once and threaded through the cycle as a
//! plain value: the reconciler reads it, the executor's confirmed results
//! are applied to a working copy, and the working copy is committed at the
//! end, including after a cancellation.
//!
//! Cycles are single-flight per root. Each cycle runs on its own task and
//! reports through a [`ProgressSubscription`], ending with exactly one
//! terminal event.

use std::collections::HashSet;
use std::path::Component;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use drivesync_conflict::{ConflictResolver, PolicyEngine};
use drivesync_core::config::{Config, RootConfig};
use drivesync_core::domain::{
    Action, ActionKind, ActionPlan, ChangeSet, CycleId, CyclePhase, RelativePath, RemoteId,
    SyncRoot, SyncRootId, SyncState, TrackedItem,
};
use drivesync_core::ports::{
    ILocalFileSystem, IRemoteStore, IStateStore, ITokenProvider, RemoteError,
};

use crate::exclusion::ExclusionPolicy;
use crate::executor::{ActionOutcome, ExecutionContext, ExecutorEvent, TransferExecutor};
use crate::progress::{
    percent, AbortReason, CycleHandle, CycleSummary, ProgressEvent, ProgressLog,
    ProgressSubscription, SkippedAction,
};
use crate::reconciler::{reconcile, restore_parents};
use crate::retry::{RetryError, RetryPolicy};
use crate::scanner::ChangeScanner;
use crate::ScanError;

/// The collaborators a cycle talks to
#[derive(Clone)]
pub struct SyncPorts {
    pub local_fs: Arc<dyn ILocalFileSystem>,
    pub remote: Arc<dyn IRemoteStore>,
    pub store: Arc<dyn IStateStore>,
    pub tokens: Arc<dyn ITokenProvider>,
}

/// Everything a cycle knows once planning is done
struct PreparedCycle {
    prior: SyncState,
    local: Vec<TrackedItem>,
    remote: Vec<TrackedItem>,
    plan: ActionPlan,
    summary: CycleSummary,
}

/// Phase tracking and event emission for one cycle
struct CycleEvents<'a> {
    log: Option<&'a ProgressLog>,
    phase: CyclePhase,
}

impl<'a> CycleEvents<'a> {
    fn new(log: Option<&'a ProgressLog>) -> Self {
        Self {
            log,
            phase: CyclePhase::Idle,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(log) = self.log {
            log.push(event);
        }
    }

    fn enter(&mut self, next: CyclePhase) {
        if self.phase == next {
            return;
        }
        match self.phase.transition_to(next) {
            Ok(()) => {
                debug!(phase = %next, "Cycle phase changed");
                self.emit(ProgressEvent::PhaseChanged { phase: next });
            }
            Err(e) => warn!(error = %e, "Ignoring illegal phase transition"),
        }
    }

    fn warn(&self, summary: &mut CycleSummary, message: String) {
        warn!(message = %message, "Cycle warning");
        summary.warnings.push(message.clone());
        self.emit(ProgressEvent::Warning { message });
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Runs sync cycles for a set of registered roots
#[derive(Clone)]
pub struct SyncOrchestrator {
    ports: SyncPorts,
    roots: Arc<DashMap<SyncRootId, SyncRoot>>,
    running: Arc<DashMap<SyncRootId, CycleId>>,
    /// Directory deletions already reported as blocked by excluded entries
    blocked: Arc<DashSet<(SyncRootId, RelativePath)>>,
    scanner: Arc<ChangeScanner>,
    resolver: Arc<ConflictResolver>,
    executor: TransferExecutor,
}

impl SyncOrchestrator {
    pub fn new(ports: SyncPorts, config: &Config) -> Self {
        let retry = RetryPolicy::from_config(&config.transfer);
        let scanner = ChangeScanner::new(
            Arc::clone(&ports.local_fs),
            Arc::clone(&ports.remote),
            ExclusionPolicy::from_config(&config.exclusions),
            retry,
        );
        let executor = TransferExecutor::new(
            Arc::clone(&ports.local_fs),
            Arc::clone(&ports.remote),
            Arc::clone(&ports.store),
            retry,
            config.transfer.concurrency,
        )
        .with_exclusions(ExclusionPolicy::from_config(&config.exclusions));
        let resolver = ConflictResolver::new(PolicyEngine::from_config(&config.conflicts));

        Self {
            ports,
            roots: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
            blocked: Arc::new(DashSet::new()),
            scanner: Arc::new(scanner),
            resolver: Arc::new(resolver),
            executor,
        }
    }

    /// Registers (or replaces) a sync root
    pub fn add_root(&self, root: SyncRoot) {
        info!(root = %root.id(), local = %root.local_path().display(), "Sync root registered");
        self.roots.insert(root.id().clone(), root);
    }

    pub fn roots(&self) -> Vec<SyncRoot> {
        let mut roots: Vec<SyncRoot> = self.roots.iter().map(|r| r.value().clone()).collect();
        roots.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        roots
    }

    pub fn is_running(&self, root: &SyncRootId) -> bool {
        self.running.contains_key(root)
    }

    /// Builds a [`SyncRoot`] from its configuration
    ///
    /// Without an explicit `remote_folder_id`, the `remote_path` is walked
    /// from `remote_base` one component at a time. Missing folders are
    /// created only for a root with no sync state yet; for any other root a
    /// missing folder is [`ScanError::RootUnavailable`].
    #[instrument(skip(self, config), fields(root = %config.name))]
    pub async fn resolve_root(
        &self,
        config: &RootConfig,
        remote_base: &RemoteId,
    ) -> Result<SyncRoot, ScanError> {
        let id = root_id(config)?;
        let first_run = self.is_first_run(&id).await;
        match self.walk_remote_path(config, remote_base, first_run).await? {
            Some(folder) => Ok(SyncRoot::new(id, config.local_path.clone(), folder)),
            None => Err(root_unavailable(
                config,
                "remote folder is missing and the root has synced before".into(),
            )),
        }
    }

    /// Like [`resolve_root`](Self::resolve_root), but never creates folders
    ///
    /// Returns `Ok(None)` when the remote folder does not exist yet for a
    /// root that has never synced, i.e. a real cycle would create it.
    #[instrument(skip(self, config), fields(root = %config.name))]
    pub async fn find_root(
        &self,
        config: &RootConfig,
        remote_base: &RemoteId,
    ) -> Result<Option<SyncRoot>, ScanError> {
        let id = root_id(config)?;
        if let Some(folder) = self.walk_remote_path(config, remote_base, false).await? {
            return Ok(Some(SyncRoot::new(id, config.local_path.clone(), folder)));
        }
        if self.is_first_run(&id).await {
            Ok(None)
        } else {
            Err(root_unavailable(
                config,
                "remote folder is missing and the root has synced before".into(),
            ))
        }
    }

    /// True when the store holds neither a snapshot nor records for `root`
    ///
    /// An unreadable store counts as not a first run.
    async fn is_first_run(&self, root: &SyncRootId) -> bool {
        match self.ports.store.snapshot_info(root).await {
            Ok(info) => info.is_none(),
            Err(e) => {
                warn!(root = %root, error = %e, "Cannot tell whether the root has synced before");
                false
            }
        }
    }

    /// Resolves `remote_path` below `remote_base`
    ///
    /// Returns `Ok(None)` at the first missing component unless `create`
    /// is set.
    async fn walk_remote_path(
        &self,
        config: &RootConfig,
        remote_base: &RemoteId,
        create: bool,
    ) -> Result<Option<RemoteId>, ScanError> {
        if let Some(raw) = &config.remote_folder_id {
            return RemoteId::new(raw.clone())
                .map(Some)
                .map_err(|e| root_unavailable(config, e.to_string()));
        }

        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let mut current = remote_base.clone();

        for component in config.remote_path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy();
            let found = retry
                .run("find_folder", &cancel, || {
                    self.ports.remote.find_folder(&current, &name)
                })
                .await
                .map_err(retry_to_scan)?;
            let entry = match found {
                Some(entry) => entry,
                None if create => {
                    info!(folder = %name, "Creating remote folder for sync root");
                    retry
                        .run("create_folder", &cancel, || {
                            self.ports.remote.create_folder(&current, &name)
                        })
                        .await
                        .map_err(retry_to_scan)?
                }
                None => {
                    debug!(folder = %name, "Remote folder for sync root not found");
                    return Ok(None);
                }
            };
            current = entry
                .id
                .ok_or_else(|| root_unavailable(config, format!("folder {name} has no id")))
                .and_then(|id| {
                    RemoteId::new(id).map_err(|e| root_unavailable(config, e.to_string()))
                })?;
        }
        Ok(Some(current))
    }

    // ========================================================================
    // Cycle control
    // ========================================================================

    /// Starts a cycle for `root` in the background
    ///
    /// # Errors
    /// - [`AbortReason::UnknownRoot`] if the root was never registered
    /// - [`AbortReason::AlreadyRunning`] if a cycle for the root is in flight
    pub fn start_cycle(&self, root: &SyncRootId) -> Result<CycleHandle, AbortReason> {
        let sync_root = self
            .roots
            .get(root)
            .map(|r| r.value().clone())
            .ok_or_else(|| AbortReason::UnknownRoot(root.clone()))?;

        let handle = CycleHandle::new(root.clone(), ProgressLog::new());
        match self.running.entry(root.clone()) {
            Entry::Occupied(_) => {
                info!(root = %root, "Cycle already running, refusing to start another");
                return Err(AbortReason::AlreadyRunning(root.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.id());
            }
        }

        info!(root = %root, cycle = %handle.id(), "Starting sync cycle");

        let this = self.clone();
        let cycle = handle.clone();
        tokio::spawn(async move {
            let worker = this.clone();
            let task_handle = cycle.clone();
            let terminal = match tokio::spawn(async move { worker.run(sync_root, task_handle).await })
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    error!(root = %cycle.root(), error = %e, "Sync cycle task failed");
                    ProgressEvent::Aborted {
                        reason: AbortReason::Internal(e.to_string()),
                    }
                }
            };

            // Free the root before announcing the end, so a caller reacting
            // to the terminal event can start the next cycle right away
            this.running
                .remove_if(cycle.root(), |_, id| *id == cycle.id());
            cycle.log().push(terminal);
        });

        Ok(handle)
    }

    /// Requests cooperative cancellation of a cycle
    pub fn cancel(&self, handle: &CycleHandle) {
        if !handle.cancel_token().is_cancelled() {
            info!(root = %handle.root(), cycle = %handle.id(), "Cancelling sync cycle");
            handle.cancel_token().cancel();
        }
    }

    /// Events of a cycle, replayed from its first event
    pub fn subscribe_progress(&self, handle: &CycleHandle) -> ProgressSubscription {
        handle.log().subscribe()
    }

    /// Runs one cycle to its end
    ///
    /// # Errors
    /// Returns the [`AbortReason`] of a cycle that did not complete.
    pub async fn run_cycle(&self, root: &SyncRootId) -> Result<CycleSummary, AbortReason> {
        let handle = self.start_cycle(root)?;
        match self.subscribe_progress(&handle).wait().await {
            Some(ProgressEvent::Completed { summary }) => Ok(summary),
            Some(ProgressEvent::Aborted { reason }) => Err(reason),
            _ => Err(AbortReason::Internal("cycle ended without a terminal event".into())),
        }
    }

    /// Scans, reconciles and resolves without changing either side
    #[instrument(skip(self))]
    pub async fn plan_cycle(&self, root: &SyncRootId) -> Result<ActionPlan, AbortReason> {
        let sync_root = self
            .roots
            .get(root)
            .map(|r| r.value().clone())
            .ok_or_else(|| AbortReason::UnknownRoot(root.clone()))?;

        let mut events = CycleEvents::new(None);
        let prepared = self
            .prepare(&sync_root, &CancellationToken::new(), &mut events)
            .await?;
        Ok(prepared.plan)
    }

    // ========================================================================
    // Cycle body
    // ========================================================================

    /// Runs a cycle, returning its terminal event
    #[instrument(skip_all, fields(root = %root.id(), cycle = %handle.id()))]
    async fn run(&self, root: SyncRoot, handle: CycleHandle) -> ProgressEvent {
        let started = Instant::now();
        let cancel = handle.cancel_token().clone();
        let mut events = CycleEvents::new(Some(handle.log().as_ref()));

        let prepared = match self.prepare(&root, &cancel, &mut events).await {
            Ok(prepared) => prepared,
            Err(AbortReason::Cancelled { mut summary }) => {
                events.enter(CyclePhase::Cancelling);
                events.enter(CyclePhase::Idle);
                summary.duration_ms = started.elapsed().as_millis() as u64;
                return ProgressEvent::Aborted {
                    reason: AbortReason::Cancelled { summary },
                };
            }
            Err(reason) => {
                warn!(error = %reason, "Sync cycle aborted before any transfer");
                events.enter(CyclePhase::Idle);
                return ProgressEvent::Aborted { reason };
            }
        };

        let PreparedCycle {
            prior,
            local,
            remote,
            plan,
            mut summary,
        } = prepared;

        // Settled paths go straight into the working state
        let mut working = prior.clone();
        let mut pending = Vec::new();
        for action in plan.into_actions() {
            match action {
                Action::NoOp { path, settled } => {
                    summary.unchanged += 1;
                    match settled {
                        Some(item) => {
                            working.insert(item);
                        }
                        None => {
                            working.remove(&path);
                        }
                    }
                }
                other => pending.push(other),
            }
        }

        if !pending.is_empty() && !cancel.is_cancelled() {
            events.enter(CyclePhase::Executing);
            let ctx = Arc::new(
                ExecutionContext::new(root.clone(), cancel.clone()).with_scans(&local, &remote),
            );
            self.execute(ctx, pending, &prior, &mut working, &mut summary, &events)
                .await;
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            events.enter(CyclePhase::Cancelling);
        }

        events.enter(CyclePhase::Committing);
        working.set_committed_at(Utc::now());
        if let Err(e) = self.ports.store.commit(root.id(), &working).await {
            events.warn(
                &mut summary,
                format!("Failed to commit sync state: {e}; confirmed transfers remain journaled"),
            );
        }
        events.enter(CyclePhase::Idle);

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            transfers = summary.transfers(),
            skipped = summary.skipped.len(),
            conflicts = summary.conflicts,
            duration_ms = summary.duration_ms,
            cancelled,
            "Sync cycle finished"
        );

        if cancelled {
            ProgressEvent::Aborted {
                reason: AbortReason::Cancelled { summary },
            }
        } else {
            ProgressEvent::Completed { summary }
        }
    }

    /// Token gate, load, scan, reconcile and resolve
    async fn prepare(
        &self,
        root: &SyncRoot,
        cancel: &CancellationToken,
        events: &mut CycleEvents<'_>,
    ) -> Result<PreparedCycle, AbortReason> {
        let mut summary = CycleSummary::default();
        events.enter(CyclePhase::Scanning);

        self.ports.tokens.get_valid_token().await?;

        let prior = match self.ports.store.load(root.id()).await {
            Ok(state) => state,
            Err(e) => {
                events.warn(
                    &mut summary,
                    format!("Sync state unavailable ({e}); reconciling from scratch"),
                );
                SyncState::empty()
            }
        };

        let (local, remote) = match self.scanner.scan(root, &prior, cancel).await {
            Ok(scans) => scans,
            Err(ScanError::Cancelled) => return Err(AbortReason::Cancelled { summary }),
            Err(e) => return Err(e.into()),
        };
        events.emit(ProgressEvent::ScanCompleted {
            local_items: local.len(),
            remote_items: remote.len(),
        });
        if cancel.is_cancelled() {
            return Err(AbortReason::Cancelled { summary });
        }

        events.enter(CyclePhase::Reconciling);
        let changes = ChangeSet::new(local, remote, prior, Utc::now());
        let mut plan = reconcile(&changes);
        let ChangeSet {
            local,
            remote,
            prior,
            ..
        } = changes;

        events.enter(CyclePhase::Resolving);
        self.resolve_conflicts(&mut plan, &local, &remote, &mut summary, events);
        restore_parents(&mut plan);

        events.emit(ProgressEvent::PlanReady {
            stats: plan.stats().clone(),
        });
        info!(
            actions = plan.len(),
            transfers = plan.transfer_count(),
            conflicts = summary.conflicts,
            "Plan ready"
        );

        if cancel.is_cancelled() {
            return Err(AbortReason::Cancelled { summary });
        }

        Ok(PreparedCycle {
            prior,
            local,
            remote,
            plan,
            summary,
        })
    }

    /// Replaces every conflict with the action settling it
    ///
    /// A conflict the resolver rejects is dropped from the plan and reported
    /// as skipped; its prior state is kept.
    fn resolve_conflicts(
        &self,
        plan: &mut ActionPlan,
        local: &[TrackedItem],
        remote: &[TrackedItem],
        summary: &mut CycleSummary,
        events: &CycleEvents<'_>,
    ) {
        if plan.stats().conflicts == 0 {
            return;
        }

        let existing: HashSet<&RelativePath> = local
            .iter()
            .chain(remote.iter())
            .map(TrackedItem::path)
            .collect();
        let mut generated: HashSet<RelativePath> = HashSet::new();

        let actions = std::mem::take(plan.actions_mut());
        let mut resolved_actions = Vec::with_capacity(actions.len());

        for action in actions {
            let record = match action {
                Action::Conflict(record) => record,
                other => {
                    resolved_actions.push(other);
                    continue;
                }
            };

            let path = record.path().clone();
            let kind = record.kind();
            let taken = |candidate: &RelativePath| {
                existing.contains(candidate) || generated.contains(candidate)
            };

            match self.resolver.resolve(record, taken) {
                Ok(resolved) => {
                    summary.conflicts += 1;
                    let renamed_to = resolved.record.renamed_to().cloned();
                    if let Some(name) = &renamed_to {
                        generated.insert(name.clone());
                    }
                    if let Some(resolution) = resolved.record.resolution() {
                        events.emit(ProgressEvent::ConflictResolved {
                            path,
                            kind,
                            resolution,
                            renamed_to,
                        });
                    }
                    resolved_actions.push(resolved.action);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Conflict could not be resolved, skipping");
                    events.emit(ProgressEvent::ActionSkipped {
                        path: path.clone(),
                        action: ActionKind::Conflict,
                        error: e.to_string(),
                    });
                    summary.skipped.push(SkippedAction {
                        path,
                        action: ActionKind::Conflict,
                        error: e.to_string(),
                    });
                }
            }
        }

        *plan.actions_mut() = resolved_actions;
        plan.order();
        plan.refresh_stats();
    }

    /// Runs the executor, folding each outcome into the working state
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        actions: Vec<Action>,
        prior: &SyncState,
        working: &mut SyncState,
        summary: &mut CycleSummary,
        events: &CycleEvents<'_>,
    ) {
        let total = actions.len();
        let root = ctx.root.id().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = self.executor.clone();
        let task = tokio::spawn(async move { executor.execute(ctx, actions, Some(tx)).await });

        let mut finished = 0usize;
        while let Some(event) = rx.recv().await {
            match event {
                ExecutorEvent::Started { path, kind } => {
                    events.emit(ProgressEvent::ActionStarted { path, action: kind });
                }
                ExecutorEvent::Finished(ActionOutcome::Completed { action, update }) => {
                    finished += 1;
                    self.blocked.remove(&(root.clone(), action.path().clone()));
                    count_completed(summary, &action, prior);
                    working.apply(update);
                    events.emit(ProgressEvent::ActionCompleted {
                        path: action.path().clone(),
                        action: action.kind(),
                        completed: finished,
                        total,
                        percent: percent(finished, total),
                    });
                }
                ExecutorEvent::Finished(ActionOutcome::Skipped { action, error }) => {
                    finished += 1;
                    let skipped = SkippedAction {
                        path: action.path().clone(),
                        action: action.kind(),
                        error: error.to_string(),
                    };
                    events.emit(ProgressEvent::ActionSkipped {
                        path: skipped.path.clone(),
                        action: skipped.action,
                        error: skipped.error.clone(),
                    });
                    summary.skipped.push(skipped);
                }
                ExecutorEvent::Finished(ActionOutcome::Blocked { action, reason }) => {
                    finished += 1;
                    // Reported once until the deletion goes through
                    if self.blocked.insert((root.clone(), action.path().clone())) {
                        events.warn(
                            summary,
                            format!(
                                "Kept {}: {reason}; it is removed once they are gone",
                                action.path()
                            ),
                        );
                    } else {
                        debug!(path = %action.path(), "Deletion still blocked by excluded entries");
                    }
                }
                ExecutorEvent::Finished(ActionOutcome::Cancelled { action }) => {
                    debug!(action = %action, "Action not run");
                }
            }
        }

        if let Err(e) = task.await {
            error!(error = %e, "Transfer executor task failed");
            events.warn(summary, format!("Transfer executor failed: {e}"));
        }
    }
}

/// Adds a completed action to the summary counters
fn count_completed(summary: &mut CycleSummary, action: &Action, prior: &SyncState) {
    match action {
        Action::Upload(item) if item.remote_id().is_some() => summary.updated += 1,
        Action::Upload(_) => summary.uploaded += 1,
        Action::Download(item) if prior.contains(item.path()) => summary.updated += 1,
        Action::Download(_) => summary.downloaded += 1,
        Action::DeleteLocal(_) => summary.deleted_local += 1,
        Action::DeleteRemote(_) => summary.deleted_remote += 1,
        Action::CreateLocalDir(_) | Action::CreateRemoteDir(_) => summary.dirs_created += 1,
        Action::Rename { then, .. } => {
            summary.renamed += 1;
            if let Some(next) = then {
                count_completed(summary, next, prior);
            }
        }
        Action::Conflict(_) | Action::NoOp { .. } => {}
    }
}

fn root_id(config: &RootConfig) -> Result<SyncRootId, ScanError> {
    SyncRootId::new(config.name.clone()).map_err(|e| root_unavailable(config, e.to_string()))
}

fn root_unavailable(config: &RootConfig, reason: String) -> ScanError {
    ScanError::RootUnavailable {
        path: config.remote_path.display().to_string(),
        reason,
    }
}

fn retry_to_scan(err: RetryError<RemoteError>) -> ScanError {
    match err {
        RetryError::Failed(e) => e.into(),
        RetryError::Cancelled => ScanError::Cancelled,
    }
}
