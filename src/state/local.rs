//! Local file-based state storage backend.
//!
//! State lives in `.convoy/state.json` (or a configured directory), with the
//! advisory lock in `state.lock` beside it. The lock file is published with a
//! hard link, which fails if the file already exists, so two processes can
//! never both create it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConvoyError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::DeploymentState;

/// Default state directory name.
pub const STATE_DIR: &str = ".convoy";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// Create-or-evict rounds before giving up on a contended lock.
const LOCK_ATTEMPTS: usize = 3;

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    base_dir: PathBuf,
}

fn write_failed(context: &str, e: &std::io::Error) -> ConvoyError {
    ConvoyError::State(StateError::WriteFailed {
        message: format!("{context}: {e}"),
    })
}

fn lock_failed(context: &str, e: impl std::fmt::Display) -> ConvoyError {
    ConvoyError::State(StateError::LockFailed {
        message: format!("{context}: {e}"),
    })
}

fn locked_by(existing: LockInfo) -> ConvoyError {
    ConvoyError::State(StateError::LockedByOther {
        holder: existing.holder,
        since: existing.acquired_at.to_rfc3339(),
    })
}

fn corrupted(context: &str, e: impl std::fmt::Display) -> ConvoyError {
    ConvoyError::State(StateError::Corrupted {
        message: format!("{context}: {e}"),
    })
}

impl LocalStateStore {
    /// Creates a store under `.convoy` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvoyError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding the state and lock files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn state_path(&self) -> PathBuf {
        self.base_dir.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| write_failed("Failed to create state directory", &e))?;
        }
        Ok(())
    }

    /// Writes and syncs `content` to a fresh file.
    async fn write_temp(&self, temp_path: &Path, content: &[u8]) -> Result<()> {
        self.ensure_dir().await?;

        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| write_failed("Failed to create temp file", &e))?;
        file.write_all(content)
            .await
            .map_err(|e| write_failed("Failed to write temp file", &e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed("Failed to sync temp file", &e))
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        self.write_temp(&temp_path, content).await?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| write_failed("Failed to rename temp file", &e))
    }

    /// Publishes a lock file unless one already exists.
    ///
    /// Returns `false` when another lock file is in place.
    async fn create_lock_file(&self, content: &[u8]) -> Result<bool> {
        let temp_path = self
            .lock_path()
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        self.write_temp(&temp_path, content).await?;

        let linked = fs::hard_link(&temp_path, self.lock_path()).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            debug!("Failed to remove {}: {e}", temp_path.display());
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lock_failed("Failed to create lock file", e)),
        }
    }

    /// Moves an expired lock out of the way.
    ///
    /// The lock file is renamed aside first; if what was moved is not the
    /// expired lock that was read, another process took over in between and
    /// its lock is put back.
    async fn evict_expired(&self, expired: &LockInfo) -> Result<()> {
        let aside = self
            .lock_path()
            .with_extension(format!("{}.stale", Uuid::new_v4().simple()));

        match fs::rename(self.lock_path(), &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(lock_failed("Failed to evict expired lock", e)),
        }

        let moved: Option<LockInfo> = fs::read_to_string(&aside)
            .await
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());

        if moved.is_some_and(|lock| lock.lock_id != expired.lock_id) {
            debug!("Lock changed hands during eviction; restoring it");
            if let Err(e) = fs::hard_link(&aside, self.lock_path()).await {
                warn!("Failed to restore lock file: {e}");
            }
        } else {
            debug!("Evicted expired lock held by {}", expired.holder);
        }

        fs::remove_file(&aside)
            .await
            .map_err(|e| lock_failed("Failed to remove evicted lock", e))
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let lock_path = self.lock_path();
        if !lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&lock_path)
            .await
            .map_err(|e| corrupted("Failed to read lock file", e))?;
        let info = serde_json::from_str(&content).map_err(|e| corrupted("Failed to parse lock file", e))?;
        Ok(Some(info))
    }

    async fn delete_lock_file(&self) -> Result<()> {
        let lock_path = self.lock_path();
        if lock_path.exists() {
            fs::remove_file(&lock_path)
                .await
                .map_err(|e| lock_failed("Failed to delete lock file", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let state_path = self.state_path();
        if !state_path.exists() {
            debug!("State file does not exist: {}", state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", state_path.display());
        let content = fs::read_to_string(&state_path)
            .await
            .map_err(|e| corrupted("Failed to read state file", e))?;
        let state = serde_json::from_str(&content).map_err(|e| corrupted("Failed to parse state file", e))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        info!("Saving state to: {}", self.state_path().display());
        self.write_atomic(&self.state_path(), content.as_bytes()).await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path().exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let info = LockInfo::new(holder, operation);
        let content = serde_json::to_vec_pretty(&info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        for _ in 0..LOCK_ATTEMPTS {
            if self.create_lock_file(&content).await? {
                info!("Acquired state lock {} for {operation}", info.lock_id);
                return Ok(info);
            }

            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => return Err(locked_by(existing)),
                Some(existing) => {
                    debug!("Taking over expired lock held by {}", existing.holder);
                    self.evict_expired(&existing).await?;
                }
                None => {}
            }
        }

        Err(lock_failed("Failed to acquire state lock", "lock is contended"))
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock.lock_id => {
                let mut refreshed = existing;
                refreshed.refresh();
                let content = serde_json::to_vec_pretty(&refreshed)
                    .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
                self.write_atomic(&self.lock_path(), &content).await?;
                debug!("Refreshed state lock {} until {}", lock.lock_id, refreshed.expires_at);
                Ok(refreshed)
            }
            Some(existing) => Err(locked_by(existing)),
            None => Err(lock_failed("Failed to refresh state lock", "lock no longer exists")),
        }
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await?;
        self.delete_lock_file().await?;
        Ok(existing)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeMap, ResourceId, ResourceKind};
    use crate::remote::RemoteResource;
    use tempfile::TempDir;
    use tokio::task::JoinSet;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join("state"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = DeploymentState::new("test-project", "dev");
        state.observed.record(RemoteResource {
            id: ResourceId::new(ResourceKind::Cluster, "c1"),
            attributes: AttributeMap::new(),
            remote_id: Some(String::from("cluster-123")),
        });
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.project, "test-project");
        assert_eq!(loaded.observed, state.observed);

        let leftovers: Vec<_> = std::fs::read_dir(store.base_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "state.json")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_state_is_reported() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.base_dir()).unwrap();
        std::fs::write(store.base_dir().join("state.json"), "{ not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ConvoyError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_force_unlock() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("holder-1", "apply").await.unwrap();
        let err = store.acquire_lock("holder-2", "apply").await.unwrap_err();
        assert!(matches!(err, ConvoyError::State(StateError::LockedByOther { .. })));

        store.release_lock("some-other-id").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        let removed = store.force_unlock().await.unwrap().unwrap();
        assert_eq!(removed.lock_id, lock.lock_id);
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        let mut stale = LockInfo::new("crashed", "apply");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        store
            .write_atomic(&store.lock_path(), &serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let fresh = store.acquire_lock("me", "apply").await.unwrap();
        assert_eq!(fresh.holder, "me");
    }

    async fn race_for_lock(store: &LocalStateStore, contenders: usize) -> (Vec<LockInfo>, usize) {
        let mut tasks = JoinSet::new();
        for i in 0..contenders {
            let store = store.clone();
            tasks.spawn(async move { store.acquire_lock(&format!("holder-{i}"), "apply").await });
        }

        let mut acquired = Vec::new();
        let mut refused = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(info) => acquired.push(info),
                Err(ConvoyError::State(StateError::LockedByOther { .. })) => refused += 1,
                Err(e) => panic!("unexpected lock error: {e}"),
            }
        }
        (acquired, refused)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_yield_a_single_holder() {
        let (store, _temp) = create_test_store();

        let (acquired, refused) = race_for_lock(&store, 8).await;

        assert_eq!(acquired.len(), 1);
        assert_eq!(refused, 7);
        let on_disk = store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(on_disk.lock_id, acquired[0].lock_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_takeover_of_expired_lock_yields_a_single_holder() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("crashed", "apply");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        store
            .write_atomic(&store.lock_path(), &serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let (acquired, refused) = race_for_lock(&store, 2).await;

        assert_eq!(acquired.len(), 1);
        assert_eq!(refused, 1);
        let on_disk = store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(on_disk.lock_id, acquired[0].lock_id);
    }

    #[tokio::test]
    async fn test_refresh_rejects_a_foreign_lock() {
        let (store, _temp) = create_test_store();
        let mine = store.acquire_lock("me", "apply").await.unwrap();
        store.force_unlock().await.unwrap();
        store.acquire_lock("other", "apply").await.unwrap();

        let err = store.refresh_lock(&mine).await.unwrap_err();
        assert!(matches!(err, ConvoyError::State(StateError::LockedByOther { .. })));
    }
}
