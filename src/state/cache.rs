//! Shared in-process view of the remote state.
//!
//! Workers of the plan executor record what the control plane returned into
//! an [`ObservedCache`], and serialize work on any single resource through
//! [`ResourceLocks`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::ResourceId;
use crate::remote::RemoteResource;

use super::types::{ObservedResource, ObservedState};

/// Thread-safe handle to an [`ObservedState`].
///
/// Cloning is cheap and yields a handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct ObservedCache {
    inner: Arc<RwLock<ObservedState>>,
}

impl ObservedCache {
    /// Wraps an existing observed state.
    #[must_use]
    pub fn new(initial: ObservedState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Records a resource as returned by the control plane.
    pub async fn record(&self, resource: RemoteResource) {
        self.inner.write().await.record(resource);
    }

    /// Forgets a resource.
    pub async fn forget(&self, id: &ResourceId) {
        self.inner.write().await.remove(id);
    }

    /// Returns a copy of a single entry.
    pub async fn get(&self, id: &ResourceId) -> Option<ObservedResource> {
        self.inner.read().await.get(id).cloned()
    }

    /// Returns a copy of the whole state.
    pub async fn snapshot(&self) -> ObservedState {
        self.inner.read().await.clone()
    }
}

/// Held while working on one resource.
pub type ResourceGuard = OwnedMutexGuard<()>;

/// One async mutex per resource id, created on first use.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocks {
    locks: Arc<Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>>,
}

impl ResourceLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &ResourceId) -> ResourceGuard {
        let lock = {
            let mut table = self.locks.lock().await;
            Arc::clone(table.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeMap, ResourceKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cache_handles_share_state() {
        let cache = ObservedCache::default();
        let other = cache.clone();
        let id = ResourceId::new(ResourceKind::Cluster, "c1");

        other
            .record(RemoteResource {
                id: id.clone(),
                attributes: AttributeMap::new(),
                remote_id: None,
            })
            .await;

        assert!(cache.get(&id).await.is_some());
        assert_eq!(cache.snapshot().await.len(), 1);

        cache.forget(&id).await;
        assert!(other.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_same_resource_is_exclusive() {
        let locks = ResourceLocks::new();
        let id = ResourceId::new(ResourceKind::Service, "s1");

        let guard = locks.lock(&id).await;
        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_resources_do_not_block() {
        let locks = ResourceLocks::new();
        let _a = locks.lock(&ResourceId::new(ResourceKind::Service, "a")).await;

        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&ResourceId::new(ResourceKind::Service, "b")),
        )
        .await;
        assert!(b.is_ok());
    }
}
