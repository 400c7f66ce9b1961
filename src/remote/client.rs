//! The control plane capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AttributeMap, ResourceId, ResourceSpec};
use crate::error::Result;

/// A resource as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Which resource this is.
    pub id: ResourceId,
    /// Current remote attributes. May include remote-managed keys.
    pub attributes: AttributeMap,
    /// Identifier assigned by the control plane.
    #[serde(default)]
    pub remote_id: Option<String>,
}

/// Remote API that describes, creates and updates resources.
///
/// Implementations report throttling, timeouts and connection problems as the
/// transient `RemoteError` variants so the executor can retry them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Looks up a resource. `Ok(None)` means it does not exist.
    async fn describe(&self, id: &ResourceId) -> Result<Option<RemoteResource>>;

    /// Creates a resource.
    async fn create(&self, spec: &ResourceSpec) -> Result<RemoteResource>;

    /// Replaces the attributes of an existing resource.
    async fn update(&self, spec: &ResourceSpec) -> Result<RemoteResource>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
