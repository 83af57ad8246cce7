//! SQLite implementation of IStateStore
//!
//! Each sync root owns one row in `snapshots` holding its last committed
//! state, and any number of rows in `journal` holding per-item records
//! written since that commit.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                                   |
//! |------------------|----------|--------------------------------------------|
//! | SyncRootId       | TEXT     | String via `.as_str()`                     |
//! | RelativePath     | TEXT     | String via `.as_str()` (journal only)      |
//! | TrackedItem      | TEXT     | serde_json serialization                   |
//! | TrackedItem[]    | TEXT     | serde_json array                           |
//! | `DateTime<Utc>`  | TEXT     | ISO 8601 via `to_rfc3339()` / `parse_from_rfc3339()` |
//!
//! ## Load / commit protocol
//!
//! ```text
//!   load   = snapshot row  ──► replay journal rows in seq order
//!   record = INSERT journal row (item JSON, or NULL for a removal)
//!   commit = BEGIN; UPSERT snapshot; DELETE journal rows; COMMIT
//! ```
//!
//! Because commit replaces the snapshot and clears the journal in one
//! transaction, a crash at any point leaves either the old snapshot plus
//! its journal or the new snapshot alone.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use drivesync_core::domain::{RelativePath, SyncRootId, SyncState, TrackedItem, SCHEMA_VERSION};
use drivesync_core::ports::{IStateStore, SnapshotInfo, StateStoreError};

use crate::CacheError;

/// SQLite-based implementation of the state store port
///
/// Writes are serialised through an internal lock so concurrent transfer
/// workers can call [`IStateStore::record_item`] freely.
pub struct SqliteStateStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStateStore {
    /// Creates a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(s) if !s.is_empty() => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| CacheError::SerializationError(format!("Invalid datetime '{}': {}", s, e))),
        _ => Ok(None),
    }
}

fn corrupt(root: &SyncRootId, reason: impl Into<String>) -> StateStoreError {
    StateStoreError::Corrupt {
        root: root.to_string(),
        reason: reason.into(),
    }
}

fn unavailable(e: sqlx::Error) -> StateStoreError {
    StateStoreError::Unavailable(e.to_string())
}

fn write_failed(e: sqlx::Error) -> StateStoreError {
    StateStoreError::WriteFailed(e.to_string())
}

/// Decode a snapshot payload written with schema `version`
///
/// Older layouts are upgraded here as the schema evolves.
fn decode_payload(version: u32, payload: &str) -> Result<Vec<TrackedItem>, String> {
    match version {
        SCHEMA_VERSION => serde_json::from_str(payload).map_err(|e| format!("snapshot items: {e}")),
        other => Err(format!("no upgrade path from schema version {other}")),
    }
}

fn encode_item(item: &TrackedItem) -> Result<String, StateStoreError> {
    serde_json::to_string(item)
        .map_err(|e| StateStoreError::WriteFailed(format!("Failed to serialize item: {e}")))
}

// ============================================================================
// IStateStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateStore for SqliteStateStore {
    async fn load(&self, root: &SyncRootId) -> Result<SyncState, StateStoreError> {
        let snapshot = sqlx::query(
            "SELECT schema_version, committed_at, items FROM snapshots WHERE root_id = ?",
        )
        .bind(root.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut state = match snapshot {
            Some(row) => {
                let version: i64 = row.get("schema_version");
                let committed_at: Option<String> = row.get("committed_at");
                let items_json: String = row.get("items");

                let version = u32::try_from(version)
                    .map_err(|_| corrupt(root, format!("negative schema version {version}")))?;
                if version > SCHEMA_VERSION {
                    return Err(StateStoreError::UnsupportedVersion {
                        found: version,
                        supported: SCHEMA_VERSION,
                    });
                }

                let items =
                    decode_payload(version, &items_json).map_err(|reason| corrupt(root, reason))?;
                let mut state = SyncState::from_items(items);
                if let Some(at) =
                    parse_optional_datetime(committed_at).map_err(|e| corrupt(root, e.to_string()))?
                {
                    state.set_committed_at(at);
                }
                state
            }
            None => SyncState::empty(),
        };

        let journal =
            sqlx::query("SELECT seq, path, item FROM journal WHERE root_id = ? ORDER BY seq")
                .bind(root.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?;

        let replayed = journal.len();
        for row in journal {
            let seq: i64 = row.get("seq");
            let path: String = row.get("path");
            let item_json: Option<String> = row.get("item");
            match item_json {
                Some(json) => {
                    let item: TrackedItem = serde_json::from_str(&json)
                        .map_err(|e| corrupt(root, format!("journal record {seq}: {e}")))?;
                    state.apply(item);
                }
                None => {
                    let path = RelativePath::new(path)
                        .map_err(|e| corrupt(root, format!("journal record {seq}: {e}")))?;
                    state.remove(&path);
                }
            }
        }

        tracing::debug!(
            root = %root,
            entries = state.len(),
            replayed,
            "Loaded sync state"
        );
        Ok(state)
    }

    async fn commit(&self, root: &SyncRootId, state: &SyncState) -> Result<(), StateStoreError> {
        let items: Vec<&TrackedItem> = state.iter().collect();
        let items_json = serde_json::to_string(&items)
            .map_err(|e| StateStoreError::WriteFailed(format!("Failed to serialize state: {e}")))?;
        let committed_at = state.committed_at().unwrap_or_else(Utc::now).to_rfc3339();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(write_failed)?;

        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (root_id, schema_version, committed_at, items) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(root.as_str())
        .bind(i64::from(SCHEMA_VERSION))
        .bind(&committed_at)
        .bind(&items_json)
        .execute(&mut *tx)
        .await
        .map_err(write_failed)?;

        let cleared = sqlx::query("DELETE FROM journal WHERE root_id = ?")
            .bind(root.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_failed)?
            .rows_affected();

        tx.commit().await.map_err(write_failed)?;

        tracing::info!(
            root = %root,
            entries = state.len(),
            journal_cleared = cleared,
            "Committed sync state"
        );
        Ok(())
    }

    async fn record_item(
        &self,
        root: &SyncRootId,
        item: &TrackedItem,
    ) -> Result<(), StateStoreError> {
        let item_json = encode_item(item)?;
        let recorded_at = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO journal (root_id, path, item, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(root.as_str())
            .bind(item.path().as_str())
            .bind(&item_json)
            .bind(&recorded_at)
            .execute(&self.pool)
            .await
            .map_err(write_failed)?;

        tracing::trace!(
            root = %root,
            path = %item.path(),
            deleted = item.is_deleted(),
            "Recorded item"
        );
        Ok(())
    }

    async fn remove_item(
        &self,
        root: &SyncRootId,
        path: &RelativePath,
    ) -> Result<(), StateStoreError> {
        let recorded_at = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO journal (root_id, path, item, recorded_at) VALUES (?, ?, NULL, ?)")
            .bind(root.as_str())
            .bind(path.as_str())
            .bind(&recorded_at)
            .execute(&self.pool)
            .await
            .map_err(write_failed)?;

        tracing::trace!(root = %root, path = %path, "Recorded removal");
        Ok(())
    }

    async fn discard(&self, root: &SyncRootId) -> Result<(), StateStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(write_failed)?;

        sqlx::query("DELETE FROM snapshots WHERE root_id = ?")
            .bind(root.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_failed)?;
        sqlx::query("DELETE FROM journal WHERE root_id = ?")
            .bind(root.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_failed)?;

        tx.commit().await.map_err(write_failed)?;

        tracing::info!(root = %root, "Discarded sync state");
        Ok(())
    }

    async fn snapshot_info(
        &self,
        root: &SyncRootId,
    ) -> Result<Option<SnapshotInfo>, StateStoreError> {
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM journal WHERE root_id = ?")
            .bind(root.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;

        let row = sqlx::query(
            "SELECT schema_version, committed_at, \
             CASE WHEN json_valid(items) THEN json_array_length(items) END AS entries \
             FROM snapshots WHERE root_id = ?",
        )
        .bind(root.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let info = match row {
            Some(row) => {
                let version: i64 = row.get("schema_version");
                let committed_at: Option<String> = row.get("committed_at");
                let entries: Option<i64> = row.get("entries");
                Some(SnapshotInfo {
                    schema_version: u32::try_from(version).unwrap_or(0),
                    committed_at: parse_optional_datetime(committed_at)
                        .map_err(|e| corrupt(root, e.to_string()))?,
                    entries: entries.unwrap_or(0).max(0) as usize,
                    pending_records: pending.max(0) as usize,
                })
            }
            None if pending > 0 => Some(SnapshotInfo {
                schema_version: SCHEMA_VERSION,
                committed_at: None,
                entries: 0,
                pending_records: pending as usize,
            }),
            None => None,
        };

        Ok(info)
    }
}
