//! State management module for the Convoy deployment system.
//!
//! This module provides persistent state storage for the last observed
//! remote attributes of every resource, deployment history, advisory
//! locking, and the shared in-process cache used during execution.

mod store;
mod local;
mod s3;
mod lock;
mod types;
mod cache;

pub use store::{open_store, StateStore};
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use lock::{generate_holder_id, LockInfo, StateLock, LOCK_EXPIRY_SECS, LOCK_REFRESH_INTERVAL};
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, ObservedResource, ObservedState,
    STATE_VERSION,
};
pub use cache::{ObservedCache, ResourceGuard, ResourceLocks};
