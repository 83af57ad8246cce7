//! Sync command - Run sync cycles for the configured roots
//!
//! Provides the `drivesync sync` CLI command which:
//! 1. Loads and validates the configuration
//! 2. Wires the local filesystem, folder remote and SQLite state store
//! 3. Resolves each selected root's remote folder
//! 4. Runs one cycle per root concurrently, printing progress as it happens
//! 5. Prints a summary per root and fails when any cycle aborted
//!
//! With `--dry-run` the plan of each root is printed and nothing is changed:
//! the state database is only read and missing remote folders are reported
//! instead of created.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::task::JoinSet;
use tracing::{info, warn};

use drivesync_core::config::{Config, RootConfig};
use drivesync_cache::SqliteStateStore;
use drivesync_core::domain::{ActionKind, ActionPlan, RemoteId, SyncRootId};
use drivesync_core::ports::{AccessToken, IRemoteStore, IStateStore, StaticTokenProvider};
use drivesync_sync::{
    AbortReason, CycleSummary, FolderRemoteStore, HashAlgorithm, LocalFileSystemAdapter,
    ProgressEvent, ProgressSubscription, SyncOrchestrator, SyncPorts,
};

use super::{open_store, open_store_read_only, select_roots, CommandContext};
use crate::output::{format_duration_ms, plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only sync the root with this name
    #[arg(long)]
    pub root: Option<String>,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_valid_config()?;
        let selected = select_roots(&config, self.root.as_deref())?;

        let base = FolderRemoteStore::root_id().context("Invalid remote base")?;

        if self.dry_run {
            let orchestrator = build_orchestrator(&config, open_store_read_only(&config).await?)?;
            return plan(&orchestrator, &selected, &base, ctx, &*formatter).await;
        }

        let orchestrator = build_orchestrator(&config, open_store(&config).await?)?;
        let mut roots = Vec::with_capacity(selected.len());
        for root_config in selected {
            let root_config = absolute_remote(root_config)?;
            let root = orchestrator
                .resolve_root(&root_config, &base)
                .await
                .with_context(|| format!("Failed to prepare root '{}'", root_config.name))?;
            roots.push(root.id().clone());
            orchestrator.add_root(root);
        }

        info!(roots = roots.len(), "Starting sync");
        let mut cycles = JoinSet::new();
        for root in &roots {
            let handle = orchestrator.start_cycle(root)?;
            let subscription = orchestrator.subscribe_progress(&handle);
            let formatter = Arc::clone(&formatter);
            let root = root.clone();
            cycles.spawn(async move {
                let outcome = follow(&root, subscription, &*formatter).await;
                (root, outcome)
            });
        }

        let mut results = Vec::with_capacity(roots.len());
        while let Some(joined) = cycles.join_next().await {
            results.push(joined.context("Progress task failed")?);
        }
        results.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let mut failed = 0;
        let mut json = Vec::new();
        for (root, outcome) in &results {
            match outcome {
                Some(ProgressEvent::Completed { summary }) => {
                    if ctx.is_json() {
                        json.push(summary_json(root, "completed", summary, None));
                    } else {
                        print_summary(root, summary, &*formatter);
                    }
                }
                Some(ProgressEvent::Aborted { reason }) => {
                    failed += 1;
                    if ctx.is_json() {
                        let summary = match reason {
                            AbortReason::Cancelled { summary } => summary.clone(),
                            _ => CycleSummary::default(),
                        };
                        json.push(summary_json(root, "aborted", &summary, Some(reason)));
                    } else {
                        formatter.error(&format!("{root}: {reason}"));
                    }
                }
                _ => {
                    failed += 1;
                    formatter.error(&format!("{root}: cycle ended without a result"));
                }
            }
        }

        if ctx.is_json() {
            formatter.print_json(&serde_json::Value::Array(json));
        }

        if failed > 0 {
            bail!("{} aborted", plural(failed, "sync cycle"));
        }
        Ok(())
    }
}

/// Prints the plan of each root without creating folders or state
async fn plan(
    orchestrator: &SyncOrchestrator,
    selected: &[&RootConfig],
    base: &RemoteId,
    ctx: &CommandContext,
    formatter: &dyn OutputFormatter,
) -> Result<()> {
    let mut json = Vec::new();
    for root_config in selected {
        let root_config = absolute_remote(root_config)?;
        let found = orchestrator
            .find_root(&root_config, base)
            .await
            .with_context(|| format!("Failed to prepare root '{}'", root_config.name))?;
        let Some(root) = found else {
            if ctx.is_json() {
                json.push(missing_root_json(&root_config));
            } else {
                formatter.success(&format!(
                    "{}: remote root {} would be created",
                    root_config.name,
                    root_config.remote_path.display()
                ));
            }
            continue;
        };

        let id = root.id().clone();
        orchestrator.add_root(root);
        let plan = orchestrator
            .plan_cycle(&id)
            .await
            .with_context(|| format!("Failed to plan root '{id}'"))?;
        if ctx.is_json() {
            json.push(plan_json(&id, &plan));
        } else {
            print_plan(&id, &plan, formatter);
        }
    }
    if ctx.is_json() {
        formatter.print_json(&serde_json::Value::Array(json));
    }
    Ok(())
}

/// Orchestrator over the local filesystem, the folder remote and SQLite
fn build_orchestrator(config: &Config, store: SqliteStateStore) -> Result<SyncOrchestrator> {
    let algorithm: HashAlgorithm = config
        .transfer
        .hash_algorithm
        .parse()
        .map_err(anyhow::Error::msg)?;

    let ports = SyncPorts {
        local_fs: Arc::new(LocalFileSystemAdapter::with_algorithm(algorithm)),
        remote: Arc::new(FolderRemoteStore::new("/").with_algorithm(algorithm))
            as Arc<dyn IRemoteStore>,
        store: Arc::new(store) as Arc<dyn IStateStore>,
        // The folder remote needs no credentials
        tokens: Arc::new(StaticTokenProvider::new(AccessToken::new("folder"))),
    };
    Ok(SyncOrchestrator::new(ports, config))
}

/// Folder remotes are addressed from the filesystem root
fn absolute_remote(root: &RootConfig) -> Result<RootConfig> {
    let mut root = root.clone();
    if root.remote_path.is_relative() {
        let cwd: PathBuf = std::env::current_dir().context("Failed to get current directory")?;
        root.remote_path = cwd.join(&root.remote_path);
    }
    Ok(root)
}

/// Prints progress for one cycle and returns its terminal event
async fn follow(
    root: &SyncRootId,
    mut subscription: ProgressSubscription,
    formatter: &dyn OutputFormatter,
) -> Option<ProgressEvent> {
    while let Some(event) = subscription.next().await {
        match &event {
            ProgressEvent::ScanCompleted {
                local_items,
                remote_items,
            } => formatter.info(&format!(
                "[{root}] Scanned {local_items} local and {remote_items} remote items"
            )),
            ProgressEvent::PlanReady { stats } => formatter.info(&format!(
                "[{root}] {} to apply, {} unchanged",
                plural(stats.transfers(), "change"),
                stats.unchanged
            )),
            ProgressEvent::ConflictResolved {
                path,
                kind,
                resolution,
                renamed_to,
            } => {
                let copy = renamed_to
                    .as_ref()
                    .map(|p| format!(", loser kept as {p}"))
                    .unwrap_or_default();
                formatter.warn(&format!("[{root}] Conflict on {path} ({kind}): {resolution}{copy}"));
            }
            ProgressEvent::ActionCompleted {
                path,
                action,
                percent,
                ..
            } => formatter.info(&format!("[{root}] {percent:>3}% {action} {path}")),
            ProgressEvent::ActionSkipped {
                path,
                action,
                error,
            } => formatter.warn(&format!("[{root}] Skipped {action} {path}: {error}")),
            ProgressEvent::Warning { message } => {
                warn!(root = %root, message = %message, "Cycle warning");
                formatter.warn(&format!("[{root}] {message}"));
            }
            ProgressEvent::Completed { .. } | ProgressEvent::Aborted { .. } => {
                return Some(event);
            }
            ProgressEvent::PhaseChanged { .. } | ProgressEvent::ActionStarted { .. } => {}
        }
    }
    None
}

fn print_summary(root: &SyncRootId, summary: &CycleSummary, formatter: &dyn OutputFormatter) {
    let duration = format_duration_ms(summary.duration_ms);
    if summary.transfers() == 0 && summary.skipped.is_empty() {
        formatter.success(&format!("{root}: already up to date ({duration})"));
        return;
    }

    formatter.success(&format!("{root}: sync completed in {duration}"));
    let lines = [
        ("Uploaded:      ", summary.uploaded),
        ("Downloaded:    ", summary.downloaded),
        ("Updated:       ", summary.updated),
        ("Deleted local: ", summary.deleted_local),
        ("Deleted remote:", summary.deleted_remote),
        ("Folders:       ", summary.dirs_created),
        ("Conflicts:     ", summary.conflicts),
    ];
    for (label, count) in lines {
        if count > 0 {
            formatter.info(&format!("{label} {}", plural(count, "item")));
        }
    }

    if !summary.skipped.is_empty() {
        formatter.error(&format!(
            "{} skipped, will retry next cycle:",
            plural(summary.skipped.len(), "action")
        ));
        for skipped in &summary.skipped {
            formatter.info(&format!(
                "  - {} {}: {}",
                skipped.action, skipped.path, skipped.error
            ));
        }
    }
}

fn print_plan(root: &SyncRootId, plan: &ActionPlan, formatter: &dyn OutputFormatter) {
    let stats = plan.stats();
    if stats.transfers() == 0 && stats.conflicts == 0 {
        formatter.success(&format!("{root}: nothing to do"));
        return;
    }

    formatter.success(&format!(
        "{root}: would apply {} ({} bytes)",
        plural(stats.transfers(), "change"),
        stats.total_bytes
    ));
    for action in plan.actions() {
        if action.kind() == ActionKind::NoOp {
            continue;
        }
        formatter.info(&action.to_string());
    }
}

fn summary_json(
    root: &SyncRootId,
    status: &str,
    summary: &CycleSummary,
    reason: Option<&AbortReason>,
) -> serde_json::Value {
    serde_json::json!({
        "root": root.as_str(),
        "status": status,
        "reason": reason.map(ToString::to_string),
        "summary": summary,
    })
}

fn missing_root_json(root: &RootConfig) -> serde_json::Value {
    serde_json::json!({
        "root": root.name,
        "create_remote_root": root.remote_path.display().to_string(),
        "actions": [],
    })
}

fn plan_json(root: &SyncRootId, plan: &ActionPlan) -> serde_json::Value {
    let actions: Vec<String> = plan
        .actions()
        .iter()
        .filter(|a| a.kind() != ActionKind::NoOp)
        .map(ToString::to_string)
        .collect();
    serde_json::json!({
        "root": root.as_str(),
        "stats": plan.stats(),
        "actions": actions,
    })
}
