//! End-to-end cycle behaviour on a healthy remote
//!
//! - New files and folders propagate in both directions
//! - A second cycle without changes transfers nothing
//! - Deletions propagate; folders kept alive by excluded entries are
//!   reported once
//! - Divergent edits keep both versions
//! - A metadata-only remote touch does not turn a local edit into a conflict
//! - Dry runs, progress events, single-flight and state store fallback

use std::path::PathBuf;

use chrono::{TimeZone, Utc};

use drivesync_core::config::RootConfig;
use drivesync_core::domain::{Action, ActionKind, CyclePhase};
use drivesync_sync::{AbortReason, FolderRemoteStore, ProgressEvent};

use crate::common::{rel, set_mtime, Harness};

#[tokio::test]
async fn test_new_local_file_is_uploaded() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");

    let summary = h.sync().await;

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.transfers(), 1);
    assert!(summary.skipped.is_empty());
    assert_eq!(h.read_remote("a.txt").as_deref(), Some("hello"));

    let state = h.state().await;
    let item = state.get(&rel("a.txt")).expect("a.txt tracked");
    assert_eq!(item.size(), 5);
    assert!(item.remote_id().is_some());
    assert!(item.synced_at().is_some());
}

#[tokio::test]
async fn test_remote_tree_is_downloaded() {
    let h = Harness::new().await;
    h.write_remote("sub/deeper/b.txt", "from remote");
    h.write_remote("top.txt", "top");

    let summary = h.sync().await;

    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.dirs_created, 2);
    assert_eq!(h.read_local("sub/deeper/b.txt").as_deref(), Some("from remote"));
    assert_eq!(h.read_local("top.txt").as_deref(), Some("top"));
    assert_eq!(h.state().await.len(), 4);
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_local("docs/report.txt", "quarterly");
    h.write_remote("photos/cat.jpg", "meow");
    h.write_remote("readme.md", "# readme");

    let first = h.sync().await;
    assert!(first.transfers() > 0);
    let writes = h.remote.writes();

    let second = h.sync().await;
    assert_eq!(second.transfers(), 0, "{second:?}");
    assert_eq!(second.unchanged, h.state().await.len());
    assert_eq!(h.remote.writes(), writes);
}

#[tokio::test]
async fn test_identical_content_on_both_sides_is_not_transferred() {
    let h = Harness::new().await;
    h.write_local("same.txt", "identical");
    h.write_remote("same.txt", "identical");

    let summary = h.sync().await;

    assert_eq!(summary.transfers(), 0);
    assert_eq!(summary.conflicts, 0);
    assert!(h.state().await.contains(&rel("same.txt")));
}

#[tokio::test]
async fn test_local_deletions_propagate() {
    let h = Harness::new().await;
    h.write_local("keep.txt", "keep");
    h.write_local("old/a.txt", "a");
    h.sync().await;
    assert!(h.remote_path("old/a.txt").exists());

    std::fs::remove_dir_all(h.local_path("old")).unwrap();
    let summary = h.sync().await;

    assert_eq!(summary.deleted_remote, 2);
    assert!(!h.remote_path("old").exists());
    assert_eq!(h.read_remote("keep.txt").as_deref(), Some("keep"));

    let state = h.state().await;
    assert!(!state.contains(&rel("old")));
    assert!(!state.contains(&rel("old/a.txt")));
}

#[tokio::test]
async fn test_local_folder_with_excluded_leftovers_is_reported_once() {
    let h = Harness::new().await;
    h.write_remote("x/a.txt", "a");
    h.sync().await;

    h.write_local("x/.DS_Store", "finder");
    std::fs::remove_dir_all(h.remote_path("x")).unwrap();

    let first = h.sync().await;
    assert_eq!(first.deleted_local, 1);
    assert!(first.skipped.is_empty());
    assert_eq!(first.warnings.len(), 1);
    assert!(first.warnings[0].contains(".DS_Store"), "{:?}", first.warnings);
    assert!(h.local_path("x/.DS_Store").exists());
    assert!(h.state().await.contains(&rel("x")));

    let second = h.sync().await;
    assert!(second.skipped.is_empty());
    assert!(second.warnings.is_empty());

    std::fs::remove_file(h.local_path("x/.DS_Store")).unwrap();
    let third = h.sync().await;
    assert_eq!(third.deleted_local, 1);
    assert!(!h.local_path("x").exists());
    assert!(h.state().await.is_empty());
}

#[tokio::test]
async fn test_remote_folder_with_excluded_leftovers_is_kept() {
    let h = Harness::new().await;
    h.write_local("y/b.txt", "b");
    h.sync().await;

    h.write_remote("y/.hidden", "remote only");
    std::fs::remove_dir_all(h.local_path("y")).unwrap();

    let summary = h.sync().await;
    assert_eq!(summary.deleted_remote, 1);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.warnings.len(), 1);
    assert!(h.remote_path("y/.hidden").exists());
    assert!(h.read_remote("y/b.txt").is_none());
}

#[tokio::test]
async fn test_remote_edit_is_downloaded() {
    let h = Harness::new().await;
    h.write_local("a.txt", "v1");
    h.sync().await;

    h.write_remote("a.txt", "version two");
    let summary = h.sync().await;

    assert_eq!(summary.updated, 1);
    assert_eq!(h.read_local("a.txt").as_deref(), Some("version two"));
}

#[tokio::test]
async fn test_divergent_edits_keep_both_versions() {
    let h = Harness::new().await;
    h.write_local("notes/plan.txt", "v0");
    h.sync().await;

    // Local edit is older than the remote one, so remote wins
    h.write_local("notes/plan.txt", "local edit");
    set_mtime(
        &h.local_path("notes/plan.txt"),
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    );
    h.write_remote("notes/plan.txt", "remote edit, newer");
    set_mtime(
        &h.remote_path("notes/plan.txt"),
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
    );

    let summary = h.sync().await;
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.renamed, 1);
    assert!(summary.skipped.is_empty(), "{:?}", summary.skipped);

    let copy = "notes/plan (conflicted 2024-01-01).txt";
    assert_eq!(h.read_local("notes/plan.txt").as_deref(), Some("remote edit, newer"));
    assert_eq!(h.read_local(copy).as_deref(), Some("local edit"));

    // The preserved loser travels to the remote as a new item
    let next = h.sync().await;
    assert_eq!(next.uploaded, 1);
    assert_eq!(h.read_remote(copy).as_deref(), Some("local edit"));
    assert_eq!(h.read_remote("notes/plan.txt").as_deref(), Some("remote edit, newer"));

    assert_eq!(h.sync().await.transfers(), 0);
}

#[tokio::test]
async fn test_local_edit_wins_over_remote_touch() {
    let h = Harness::new().await;
    h.write_local("a.txt", "v0");
    h.sync().await;

    set_mtime(
        &h.remote_path("a.txt"),
        Utc.with_ymd_and_hms(2030, 1, 2, 0, 0, 0).unwrap(),
    );
    h.write_local("a.txt", "local edit");

    let summary = h.sync().await;

    assert_eq!(summary.conflicts, 0);
    assert_eq!(summary.renamed, 0);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.transfers(), 1);
    assert_eq!(h.read_local("a.txt").as_deref(), Some("local edit"));
    assert_eq!(h.read_remote("a.txt").as_deref(), Some("local edit"));
    assert_eq!(h.state().await.len(), 1);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_remote("b.txt", "remote");

    let plan = h.orchestrator.plan_cycle(&h.root).await.unwrap();

    let kinds: Vec<ActionKind> = plan.actions().iter().map(Action::kind).collect();
    assert_eq!(kinds, vec![ActionKind::Upload, ActionKind::Download]);
    assert_eq!(plan.stats().transfers(), 2);
    assert!(h.read_remote("a.txt").is_none());
    assert!(h.read_local("b.txt").is_none());
    assert!(h.state().await.is_empty());
}

#[tokio::test]
async fn test_find_root_never_creates_folders() {
    let h = Harness::new().await;
    let base = FolderRemoteStore::root_id().unwrap();
    let fresh = RootConfig {
        name: "fresh".to_string(),
        local_path: h.local_path("fresh"),
        remote_path: PathBuf::from("New/Nested"),
        remote_folder_id: None,
    };
    let writes = h.remote.writes();

    assert!(h.orchestrator.find_root(&fresh, &base).await.unwrap().is_none());
    assert!(!h.remote_dir.path().join("New").exists());
    assert_eq!(h.remote.writes(), writes);

    let existing = h
        .orchestrator
        .find_root(h.root_config(), &base)
        .await
        .unwrap()
        .expect("default root exists");
    assert_eq!(existing.id(), &h.root);
}

#[tokio::test]
async fn test_progress_events_end_with_one_terminal_event() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_local("b.txt", "world");

    let handle = h.orchestrator.start_cycle(&h.root).unwrap();
    let mut events = Vec::new();
    let mut sub = h.orchestrator.subscribe_progress(&handle);
    while let Some(event) = sub.next().await {
        events.push(event);
    }

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
    assert!(events.contains(&ProgressEvent::PhaseChanged {
        phase: CyclePhase::Executing
    }));

    let last_progress = events.iter().rev().find_map(|e| match e {
        ProgressEvent::ActionCompleted {
            completed,
            total,
            percent,
            ..
        } => Some((*completed, *total, *percent)),
        _ => None,
    });
    assert_eq!(last_progress, Some((2, 2, 100)));

    // A late subscriber replays the same sequence
    assert!(handle.is_finished());
    let replayed = h.orchestrator.subscribe_progress(&handle).wait().await;
    assert_eq!(replayed.as_ref(), events.last());
}

#[tokio::test]
async fn test_single_flight_per_root() {
    let mut h = Harness::new().await;
    let other_local = tempfile::TempDir::new().unwrap();
    h.add_root("photos", other_local.path(), "Photos").await;
    let photos = drivesync_core::domain::SyncRootId::new("photos".into()).unwrap();
    h.write_local("a.txt", "hello");

    h.remote.hold_listings();
    let first = h.orchestrator.start_cycle(&h.root).unwrap();
    assert!(h.orchestrator.is_running(&h.root));

    let second = h.orchestrator.start_cycle(&h.root);
    assert_eq!(second.unwrap_err(), AbortReason::AlreadyRunning(h.root.clone()));

    let other = h.orchestrator.start_cycle(&photos).unwrap();

    h.remote.open_listings();
    let done = h.orchestrator.subscribe_progress(&first).wait().await;
    assert!(matches!(done, Some(ProgressEvent::Completed { .. })));
    let done = h.orchestrator.subscribe_progress(&other).wait().await;
    assert!(matches!(done, Some(ProgressEvent::Completed { .. })));

    // The root is free again once its terminal event is out
    assert!(h.orchestrator.start_cycle(&h.root).is_ok());
}

#[tokio::test]
async fn test_corrupt_state_falls_back_and_heals() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    sqlx::query(
        "INSERT INTO snapshots (root_id, schema_version, committed_at, items) VALUES (?, ?, ?, ?)",
    )
    .bind(h.root.as_str())
    .bind(1i64)
    .bind(Utc::now().to_rfc3339())
    .bind("{not json")
    .execute(h.store.sqlite().pool())
    .await
    .unwrap();

    let handle = h.orchestrator.start_cycle(&h.root).unwrap();
    let mut sub = h.orchestrator.subscribe_progress(&handle);
    let mut warned = false;
    let mut summary = None;
    while let Some(event) = sub.next().await {
        match event {
            ProgressEvent::Warning { .. } => warned = true,
            ProgressEvent::Completed { summary: s } => summary = Some(s),
            _ => {}
        }
    }

    assert!(warned);
    let summary = summary.expect("cycle completed");
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(summary.uploaded, 1);

    // The commit replaced the corrupt snapshot
    let state = h.state().await;
    assert!(state.contains(&rel("a.txt")));
}
