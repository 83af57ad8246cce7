//! Shared fixtures for sync cycle integration tests
//!
//! A [`Harness`] pairs a local temp directory with a [`FolderRemoteStore`]
//! over a second temp directory, wrapped in a [`FaultyRemote`] that can
//! inject errors, strip listing fields and hold listings. State lives in
//! an in-memory SQLite store, behind a [`FlakyStore`] whose commits can be
//! made to fail.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::watch;

use drivesync_cache::{DatabasePool, SqliteStateStore};
use drivesync_core::config::{Config, ConfigBuilder, RootConfig};
use drivesync_core::domain::{RelativePath, RemoteId, RevisionMarker, SyncRootId, SyncState, TrackedItem};
use drivesync_core::ports::{
    AccessToken, IRemoteStore, IStateStore, ITokenProvider, RemoteEntry, RemoteError, RemotePage,
    SnapshotInfo, StateStoreError, StaticTokenProvider,
};
use drivesync_sync::{
    CycleSummary, FolderRemoteStore, LocalFileSystemAdapter, SyncOrchestrator, SyncPorts,
};

// ============================================================================
// FaultyRemote
// ============================================================================

/// One injected failure
struct Fault {
    operation: &'static str,
    /// Matched against the item name or id
    target: String,
    error: RemoteError,
    remaining: Option<usize>,
}

/// Remote wrapper that injects failures and counts mutating calls
pub struct FaultyRemote {
    inner: FolderRemoteStore,
    faults: Mutex<Vec<Fault>>,
    stripped_hash: Mutex<Option<String>>,
    gate: watch::Sender<bool>,
    hook: Mutex<Option<Box<dyn Fn(&'static str) + Send + Sync>>>,
    writes: AtomicUsize,
}

impl FaultyRemote {
    pub fn new(inner: FolderRemoteStore) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            stripped_hash: Mutex::new(None),
            gate,
            hook: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    /// Fails `operation` on items whose name or id contains `target`,
    /// `times` times (forever when `None`)
    pub fn fail(&self, operation: &'static str, target: &str, error: RemoteError, times: Option<usize>) {
        self.faults.lock().unwrap().push(Fault {
            operation,
            target: target.to_string(),
            error,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Drops the content hash from listing entries named `name`
    pub fn strip_hash_of(&self, name: &str) {
        *self.stripped_hash.lock().unwrap() = Some(name.to_string());
    }

    /// Makes listings wait until [`FaultyRemote::open_listings`]
    pub fn hold_listings(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_listings(&self) {
        self.gate.send_replace(true);
    }

    /// Runs `hook` at the start of every mutating call
    pub fn on_write(&self, hook: impl Fn(&'static str) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Number of mutating calls that reached the store
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str, target: &str) -> Result<(), RemoteError> {
        let mut faults = self.faults.lock().unwrap();
        for fault in faults.iter_mut() {
            if fault.operation == operation && target.contains(&fault.target) {
                match &mut fault.remaining {
                    Some(0) => continue,
                    Some(n) => *n -= 1,
                    None => {}
                }
                return Err(fault.error.clone());
            }
        }
        Ok(())
    }

    fn write(&self, operation: &'static str, target: &str) -> Result<(), RemoteError> {
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(operation);
        }
        self.check(operation, target)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FaultyRemote {
    async fn list_children(
        &self,
        folder: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        let mut open = self.gate.subscribe();
        let _ = open.wait_for(|open| *open).await;

        self.check("list_children", folder.as_str())?;
        let mut page = self.inner.list_children(folder, page_token).await?;
        if let Some(name) = self.stripped_hash.lock().unwrap().as_deref() {
            for entry in &mut page.entries {
                if entry.name.as_deref() == Some(name) {
                    entry.hash = None;
                }
            }
        }
        Ok(page)
    }

    async fn get_item(&self, id: &RemoteId) -> Result<RemoteEntry, RemoteError> {
        self.check("get_item", id.as_str())?;
        self.inner.get_item(id).await
    }

    async fn find_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<Option<RemoteEntry>, RemoteError> {
        self.inner.find_folder(parent, name).await
    }

    async fn create_folder(&self, parent: &RemoteId, name: &str) -> Result<RemoteEntry, RemoteError> {
        self.write("create_folder", name)?;
        self.inner.create_folder(parent, name).await
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteEntry, RemoteError> {
        self.write("create_file", name)?;
        self.inner.create_file(parent, name, data).await
    }

    async fn update_file(
        &self,
        id: &RemoteId,
        data: Vec<u8>,
        expected_revision: Option<&RevisionMarker>,
    ) -> Result<RemoteEntry, RemoteError> {
        self.write("update_file", id.as_str())?;
        self.inner.update_file(id, data, expected_revision).await
    }

    async fn download(&self, id: &RemoteId) -> Result<Vec<u8>, RemoteError> {
        self.check("download", id.as_str())?;
        self.inner.download(id).await
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        self.write("delete", id.as_str())?;
        self.inner.delete(id).await
    }

    async fn rename(&self, id: &RemoteId, new_name: &str) -> Result<RemoteEntry, RemoteError> {
        self.write("rename", id.as_str())?;
        self.inner.rename(id, new_name).await
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// State store wrapper whose commits can be made to fail
pub struct FlakyStore {
    inner: SqliteStateStore,
    fail_commits: AtomicBool,
    records: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteStateStore) -> Self {
        Self {
            inner,
            fail_commits: AtomicBool::new(false),
            records: AtomicUsize::new(0),
        }
    }

    pub fn sqlite(&self) -> &SqliteStateStore {
        &self.inner
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Incremental records written so far
    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IStateStore for FlakyStore {
    async fn load(&self, root: &SyncRootId) -> Result<SyncState, StateStoreError> {
        self.inner.load(root).await
    }

    async fn commit(&self, root: &SyncRootId, state: &SyncState) -> Result<(), StateStoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StateStoreError::WriteFailed("simulated crash before commit".into()));
        }
        self.inner.commit(root, state).await
    }

    async fn record_item(&self, root: &SyncRootId, item: &TrackedItem) -> Result<(), StateStoreError> {
        self.records.fetch_add(1, Ordering::SeqCst);
        self.inner.record_item(root, item).await
    }

    async fn remove_item(&self, root: &SyncRootId, path: &RelativePath) -> Result<(), StateStoreError> {
        self.records.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_item(root, path).await
    }

    async fn discard(&self, root: &SyncRootId) -> Result<(), StateStoreError> {
        self.inner.discard(root).await
    }

    async fn snapshot_info(&self, root: &SyncRootId) -> Result<Option<SnapshotInfo>, StateStoreError> {
        self.inner.snapshot_info(root).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const ROOT: &str = "docs";

/// Folder below the remote base that holds the synced tree
pub const REMOTE_FOLDER: &str = "Drive";

pub fn fast_config(local: &Path) -> ConfigBuilder {
    ConfigBuilder::new()
        .root(ROOT, local.to_path_buf(), PathBuf::from(REMOTE_FOLDER))
        .transfer_concurrency(4)
        .transfer_max_attempts(3)
        .transfer_base_delay_ms(1)
        .transfer_max_delay_ms(5)
        .transfer_operation_timeout_secs(10)
}

pub struct Harness {
    pub local_dir: TempDir,
    pub remote_dir: TempDir,
    pub remote: Arc<FaultyRemote>,
    pub store: Arc<FlakyStore>,
    pub orchestrator: SyncOrchestrator,
    pub root: SyncRootId,
    config: Config,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|builder| builder).await
    }

    pub async fn with_config(customize: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let local_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let config = customize(fast_config(local_dir.path())).build();

        let remote = Arc::new(FaultyRemote::new(FolderRemoteStore::new(remote_dir.path())));
        let pool = DatabasePool::in_memory().await.unwrap();
        let store = Arc::new(FlakyStore::new(SqliteStateStore::new(pool.pool().clone())));

        let mut harness = Self {
            orchestrator: Self::orchestrator_for(&config, &remote, &store, signed_in()),
            local_dir,
            remote_dir,
            remote,
            store,
            root: SyncRootId::new(ROOT.to_string()).unwrap(),
            config,
        };
        harness.register_roots().await;
        harness
    }

    fn orchestrator_for(
        config: &Config,
        remote: &Arc<FaultyRemote>,
        store: &Arc<FlakyStore>,
        tokens: Arc<dyn ITokenProvider>,
    ) -> SyncOrchestrator {
        let ports = SyncPorts {
            local_fs: Arc::new(LocalFileSystemAdapter::new()),
            remote: Arc::clone(remote) as Arc<dyn IRemoteStore>,
            store: Arc::clone(store) as Arc<dyn IStateStore>,
            tokens,
        };
        SyncOrchestrator::new(ports, config)
    }

    async fn register_roots(&mut self) {
        let base = FolderRemoteStore::root_id().unwrap();
        for root_config in &self.config.roots {
            let root = self
                .orchestrator
                .resolve_root(root_config, &base)
                .await
                .unwrap();
            self.orchestrator.add_root(root);
        }
    }

    /// Replaces the orchestrator, as a restarted process would
    pub async fn restart(&mut self, tokens: Arc<dyn ITokenProvider>) {
        self.orchestrator = Self::orchestrator_for(&self.config, &self.remote, &self.store, tokens);
        self.register_roots().await;
    }

    /// Adds a second root sharing the same remote and store
    pub async fn add_root(&mut self, name: &str, local: &Path, remote_folder: &str) {
        let root_config = RootConfig {
            name: name.to_string(),
            local_path: local.to_path_buf(),
            remote_path: PathBuf::from(remote_folder),
            remote_folder_id: None,
        };
        let root = self
            .orchestrator
            .resolve_root(&root_config, &FolderRemoteStore::root_id().unwrap())
            .await
            .unwrap();
        self.orchestrator.add_root(root);
        self.config.roots.push(root_config);
    }

    /// Configuration of the default root
    pub fn root_config(&self) -> &RootConfig {
        &self.config.roots[0]
    }

    pub async fn sync(&self) -> CycleSummary {
        self.orchestrator.run_cycle(&self.root).await.unwrap()
    }

    pub fn local_path(&self, rel: &str) -> PathBuf {
        self.local_dir.path().join(rel)
    }

    pub fn remote_path(&self, rel: &str) -> PathBuf {
        self.remote_dir.path().join(REMOTE_FOLDER).join(rel)
    }

    pub fn write_local(&self, rel: &str, content: &str) {
        write(&self.local_path(rel), content);
    }

    pub fn write_remote(&self, rel: &str, content: &str) {
        write(&self.remote_path(rel), content);
    }

    pub fn read_local(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.local_path(rel)).ok()
    }

    pub fn read_remote(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.remote_path(rel)).ok()
    }

    pub async fn state(&self) -> SyncState {
        self.store.load(&self.root).await.unwrap()
    }
}

pub fn signed_in() -> Arc<dyn ITokenProvider> {
    Arc::new(StaticTokenProvider::new(AccessToken::new("test-token")))
}

pub fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn set_mtime(path: &Path, at: DateTime<Utc>) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(at)).unwrap();
}

pub fn rel(path: &str) -> RelativePath {
    RelativePath::new(path.to_string()).unwrap()
}
