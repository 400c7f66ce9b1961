//! State store trait definition.
//!
//! This module defines the common interface for state storage backends and
//! the factory that picks one from the document's `state` section.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::{DeployConfig, StateBackend};
use crate::error::{ConfigError, Result};

use super::local::LocalStateStore;
use super::lock::LockInfo;
use super::s3::S3StateStore;
use super::types::DeploymentState;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the deployment state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Saves the deployment state.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the state lock for `holder`.
    ///
    /// Expired locks are taken over.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Extends the expiry of a lock this process holds.
    ///
    /// Fails if the lock was lost to another holder.
    async fn refresh_lock(&self, lock: &LockInfo) -> Result<LockInfo>;

    /// Releases the lock with the given id. A mismatched id is ignored.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock regardless of holder.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by a live lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Opens the backend configured for this deployment.
///
/// # Errors
///
/// Returns an error if an S3 backend has no bucket or the AWS client fails.
pub async fn open_store(config: &DeployConfig) -> Result<Box<dyn StateStore>> {
    match config.state.backend {
        StateBackend::Local => {
            let store = match &config.state.path {
                Some(path) => LocalStateStore::with_base_dir(PathBuf::from(path)),
                None => LocalStateStore::new()?,
            };
            Ok(Box::new(store))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.clone().ok_or_else(|| {
                ConfigError::validation("S3 bucket is required for S3 state backend", "state.bucket")
            })?;
            let prefix = config
                .state
                .prefix
                .clone()
                .unwrap_or_else(|| format!("{}/{}", config.project.name, config.project.environment));
            let store = S3StateStore::new(bucket, prefix, config.state.region.clone()).await?;
            Ok(Box::new(store))
        }
    }
}
