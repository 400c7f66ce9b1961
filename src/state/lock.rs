//! Advisory state locking.
//!
//! A lock record is written next to the state document so two `apply` or
//! `reconcile` runs never mutate the same deployment at once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

use super::store::StateStore;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// How often a held lock is refreshed while a run is in progress.
pub const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Lock record as persisted by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Run type that took the lock (`apply`, `reconcile`, ...).
    #[serde(default)]
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

/// A lock held by this process.
///
/// Must be handed back through [`StateLock::release`]; a lock that is never
/// released lapses after [`LOCK_EXPIRY_SECS`] unless [`StateLock::refresh`]
/// keeps extending it.
#[derive(Debug)]
pub struct StateLock {
    info: LockInfo,
}

impl LockInfo {
    /// Creates a new lock record.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry out by [`LOCK_EXPIRY_SECS`] from now.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl StateLock {
    /// Takes the state lock through the given store.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockedByOther` if a live lock is held elsewhere.
    pub async fn acquire(store: &dyn StateStore, operation: &str) -> Result<Self> {
        let info = store.acquire_lock(&generate_holder_id(), operation).await?;
        debug!("Holding state lock {} for {operation}", info.lock_id);
        Ok(Self { info })
    }

    /// Gets the lock ID.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        &self.info.lock_id
    }

    /// Gets the lock record.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Extends the lock's expiry in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was lost or the store cannot be written.
    pub async fn refresh(&mut self, store: &dyn StateStore) -> Result<()> {
        self.info = store.refresh_lock(&self.info).await?;
        Ok(())
    }

    /// Releases the lock.
    ///
    /// Failures are logged, not returned: the run's own outcome matters more
    /// and the lock lapses on its own.
    pub async fn release(self, store: &dyn StateStore) {
        if let Err(e) = store.release_lock(&self.info.lock_id).await {
            warn!("Failed to release state lock {}: {e}", self.info.lock_id);
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];

    format!("{hostname}-{pid}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;

    #[test]
    fn test_lock_info_expiry() {
        let mut info = LockInfo::new("me", "apply");
        assert!(!info.is_expired());
        assert!(info.remaining_secs() > 0);

        info.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(info.is_expired());
        assert_eq!(info.remaining_secs(), 0);
    }

    #[test]
    fn test_lock_info_refresh() {
        let mut info = LockInfo::new("me", "apply");
        info.expires_at = Utc::now() + chrono::Duration::seconds(5);

        info.refresh();
        assert!(info.remaining_secs() > 5);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }

    #[tokio::test]
    async fn test_acquire_and_release_through_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());

        let lock = StateLock::acquire(&store, "apply").await.unwrap();
        assert_eq!(lock.info().operation, "apply");
        assert!(store.is_locked().await.unwrap());

        assert!(StateLock::acquire(&store, "reconcile").await.is_err());

        lock.release(&store).await;
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_extends_stored_expiry() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let mut lock = StateLock::acquire(&store, "apply").await.unwrap();
        let before = store.get_lock_info().await.unwrap().unwrap().expires_at;

        tokio::time::sleep(Duration::from_millis(20)).await;
        lock.refresh(&store).await.unwrap();

        let after = store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(after.lock_id, lock.lock_id());
        assert!(after.expires_at > before);
        assert_eq!(lock.info().expires_at, after.expires_at);
    }

    #[tokio::test]
    async fn test_refresh_fails_once_lock_is_lost() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let mut lock = StateLock::acquire(&store, "apply").await.unwrap();

        store.force_unlock().await.unwrap();
        let _other = store.acquire_lock("someone-else", "apply").await.unwrap();

        assert!(lock.refresh(&store).await.is_err());
    }
}
