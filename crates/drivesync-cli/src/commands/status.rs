//! Status command - Show what the state store holds per root
//!
//! Provides the `drivesync status` CLI command which prints, for each
//! configured root, the last commit time, the number of tracked entries
//! and the incremental records written since that commit. Pending records
//! mean the last cycle could not commit; the next cycle picks them up.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use drivesync_core::domain::SyncRootId;
use drivesync_core::ports::{IStateStore, SnapshotInfo};

use super::{open_store, select_roots, CommandContext};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only show the root with this name
    #[arg(long)]
    pub root: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        let selected = select_roots(&config, self.root.as_deref())?;

        if !config.state.database.exists() {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!([]));
            } else {
                formatter.info("No sync state yet. Run 'drivesync sync' first.");
            }
            return Ok(());
        }

        let store = open_store(&config).await?;
        info!(database = %config.state.database.display(), "Showing status");

        let mut json = Vec::new();
        for root_config in selected {
            let id = SyncRootId::new(root_config.name.clone())
                .with_context(|| format!("Invalid root name '{}'", root_config.name))?;
            let info = store
                .snapshot_info(&id)
                .await
                .with_context(|| format!("Failed to read state of '{id}'"))?;

            if ctx.is_json() {
                json.push(status_json(&id, root_config.local_path.display(), info.as_ref()));
                continue;
            }

            formatter.success(&format!(
                "{id}: {} <-> {}",
                root_config.local_path.display(),
                root_config.remote_path.display()
            ));
            for line in status_lines(info.as_ref()) {
                formatter.info(&line);
            }
        }

        if ctx.is_json() {
            formatter.print_json(&serde_json::Value::Array(json));
        }
        Ok(())
    }
}

fn status_lines(info: Option<&SnapshotInfo>) -> Vec<String> {
    let Some(info) = info else {
        return vec!["Never synced".to_string()];
    };

    let last = info
        .committed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let mut lines = vec![
        format!("Last commit:   {last}"),
        format!("Tracked items: {}", info.entries),
    ];
    if info.pending_records > 0 {
        lines.push(format!(
            "Pending:       {} recorded since the last commit",
            plural(info.pending_records, "change")
        ));
    }
    lines
}

fn status_json(
    id: &SyncRootId,
    local_path: impl std::fmt::Display,
    info: Option<&SnapshotInfo>,
) -> serde_json::Value {
    serde_json::json!({
        "root": id.as_str(),
        "local_path": local_path.to_string(),
        "synced": info.is_some(),
        "schema_version": info.map(|i| i.schema_version),
        "last_commit": info.and_then(|i| i.committed_at).map(|t| t.to_rfc3339()),
        "entries": info.map(|i| i.entries).unwrap_or(0),
        "pending_records": info.map(|i| i.pending_records).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(status_lines(None), vec!["Never synced"]);

        let info = SnapshotInfo {
            schema_version: 1,
            committed_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            entries: 42,
            pending_records: 2,
        };
        let lines = status_lines(Some(&info));
        assert_eq!(lines[0], "Last commit:   2024-03-01 12:00:00 UTC");
        assert_eq!(lines[1], "Tracked items: 42");
        assert!(lines[2].contains("2 changes"));
    }
}
