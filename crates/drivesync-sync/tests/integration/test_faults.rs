//! Cycle behaviour under failures
//!
//! - Transient remote errors are retried, permanent ones skip one action
//! - Malformed listings and missing credentials abort before any transfer
//! - A vanished remote root aborts instead of being recreated empty
//! - Confirmed transfers survive a crash before commit
//! - Cancellation commits exactly what completed

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drivesync_core::domain::ActionKind;
use drivesync_core::ports::{AuthError, RemoteError, StaticTokenProvider};
use drivesync_sync::{AbortReason, CycleHandle, FolderRemoteStore, ProgressEvent, ScanError};

use crate::common::{rel, signed_in, Harness, REMOTE_FOLDER};

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.remote
        .fail("create_file", "a.txt", RemoteError::Network("connection reset".into()), Some(2));

    let summary = h.sync().await;

    assert_eq!(summary.uploaded, 1);
    assert!(summary.skipped.is_empty());
    assert_eq!(h.read_remote("a.txt").as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_permanent_error_skips_only_that_action() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_local("b.txt", "too big");
    h.remote
        .fail("create_file", "b.txt", RemoteError::QuotaExceeded, None);

    let summary = h.sync().await;

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].path, rel("b.txt"));
    assert_eq!(summary.skipped[0].action, ActionKind::Upload);

    let state = h.state().await;
    assert!(state.contains(&rel("a.txt")));
    assert!(!state.contains(&rel("b.txt")));

    // Retried on the next cycle once the quota is back
    h.remote.clear_faults();
    let next = h.sync().await;
    assert_eq!(next.uploaded, 1);
    assert_eq!(h.read_remote("b.txt").as_deref(), Some("too big"));
}

#[tokio::test]
async fn test_exhausted_retries_skip_the_action() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.remote
        .fail("create_file", "a.txt", RemoteError::Server("503".into()), None);

    let summary = h.sync().await;

    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.skipped.len(), 1);
    assert!(h.read_remote("a.txt").is_none());
}

#[tokio::test]
async fn test_malformed_remote_entry_aborts_before_transfer() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_remote("r.txt", "remote");
    h.remote.strip_hash_of("r.txt");
    let writes = h.remote.writes();

    let err = h.orchestrator.run_cycle(&h.root).await.unwrap_err();

    assert!(
        matches!(err, AbortReason::Scan(ScanError::MalformedEntry { .. })),
        "{err:?}"
    );
    assert_eq!(h.remote.writes(), writes);
    assert!(h.read_remote("a.txt").is_none());
    assert!(h.read_local("r.txt").is_none());
    assert!(h.state().await.is_empty());
}

#[tokio::test]
async fn test_missing_credentials_abort_the_cycle() {
    let mut h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.restart(Arc::new(StaticTokenProvider::signed_out())).await;

    let err = h.orchestrator.run_cycle(&h.root).await.unwrap_err();

    assert_eq!(err, AbortReason::Auth(AuthError::NotSignedIn));
    assert!(h.read_remote("a.txt").is_none());
}

#[tokio::test]
async fn test_vanished_remote_root_aborts_and_keeps_local_files() {
    let h = Harness::new().await;
    h.write_local("a.txt", "hello");
    h.write_local("sub/b.txt", "world");
    h.sync().await;

    let remote_root = h.remote_dir.path().join(REMOTE_FOLDER);
    std::fs::remove_dir_all(&remote_root).unwrap();
    let writes = h.remote.writes();

    let err = h.orchestrator.run_cycle(&h.root).await.unwrap_err();
    assert!(
        matches!(err, AbortReason::Scan(ScanError::RootUnavailable { .. })),
        "{err:?}"
    );

    // Resolving the root again, as a restarted process does, must not
    // bring it back empty
    let base = FolderRemoteStore::root_id().unwrap();
    let err = h
        .orchestrator
        .resolve_root(h.root_config(), &base)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::RootUnavailable { .. }), "{err:?}");

    assert!(!remote_root.exists());
    assert_eq!(h.remote.writes(), writes);
    assert_eq!(h.read_local("a.txt").as_deref(), Some("hello"));
    assert_eq!(h.read_local("sub/b.txt").as_deref(), Some("world"));
    assert_eq!(h.state().await.len(), 3);
}

#[tokio::test]
async fn test_restart_after_crash_transfers_only_the_rest() {
    let mut h = Harness::new().await;
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        h.write_local(name, name);
    }
    h.remote
        .fail("create_file", "c.txt", RemoteError::Network("down".into()), None);
    h.remote
        .fail("create_file", "d.txt", RemoteError::Network("down".into()), None);
    h.store.fail_commits(true);

    // Two of four succeed, then the process dies before the commit lands
    let first = h.sync().await;
    assert_eq!(first.uploaded, 2);
    assert_eq!(first.skipped.len(), 2);
    assert_eq!(first.warnings.len(), 1);
    assert_eq!(h.store.records(), 2);

    h.remote.clear_faults();
    h.store.fail_commits(false);
    h.restart(signed_in()).await;

    let writes = h.remote.writes();
    let second = h.sync().await;
    assert_eq!(second.uploaded, 2);
    assert_eq!(h.remote.writes() - writes, 2);
    assert_eq!(h.state().await.len(), 4);
}

#[tokio::test]
async fn test_cancellation_commits_completed_actions() {
    let h = Harness::with_config(|builder| builder.transfer_concurrency(1)).await;
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        h.write_local(name, name);
    }

    let slot: Arc<Mutex<Option<CycleHandle>>> = Arc::new(Mutex::new(None));
    let uploads = Arc::new(AtomicUsize::new(0));
    {
        let slot = Arc::clone(&slot);
        let orchestrator = h.orchestrator.clone();
        h.remote.on_write(move |operation| {
            if operation == "create_file" && uploads.fetch_add(1, Ordering::SeqCst) == 1 {
                if let Some(handle) = slot.lock().unwrap().as_ref() {
                    orchestrator.cancel(handle);
                }
            }
        });
    }

    let handle = h.orchestrator.start_cycle(&h.root).unwrap();
    *slot.lock().unwrap() = Some(handle.clone());

    let mut sub = h.orchestrator.subscribe_progress(&handle);
    let mut terminals = Vec::new();
    while let Some(event) = sub.next().await {
        if event.is_terminal() {
            terminals.push(event);
        }
    }

    assert_eq!(terminals.len(), 1);
    let summary = match terminals.pop() {
        Some(ProgressEvent::Aborted {
            reason: AbortReason::Cancelled { summary },
        }) => summary,
        other => panic!("expected a cancelled cycle, got {other:?}"),
    };
    assert_eq!(summary.uploaded, 2);

    let state = h.state().await;
    assert_eq!(state.len(), 2);
    assert!(state.contains(&rel("a.txt")));
    assert!(state.contains(&rel("b.txt")));

    // The next cycle picks up where the cancelled one stopped
    h.remote.on_write(|_| {});
    let next = h.sync().await;
    assert_eq!(next.uploaded, 2);
}
