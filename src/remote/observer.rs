//! Refreshing the observed state from the control plane.
//!
//! Before planning, every resource in the document is described so the diff
//! works from what actually exists remotely, not from the last saved state.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ResourceId;
use crate::error::Result;
use crate::planner::RetryPolicy;
use crate::state::ObservedState;

use super::client::ControlPlane;

/// Queries the control plane for the current state of resources.
#[derive(Clone)]
pub struct StateObserver {
    control_plane: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StateObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObserver")
            .field("control_plane", &self.control_plane.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl StateObserver {
    /// Creates an observer over the given control plane.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, retry: RetryPolicy) -> Self {
        Self { control_plane, retry }
    }

    /// Describes every resource in `ids`, in order.
    ///
    /// Resources the control plane does not know are left out of the result.
    ///
    /// # Errors
    ///
    /// Returns the first describe error that survives retries.
    pub async fn observe(&self, ids: &[ResourceId]) -> Result<ObservedState> {
        info!("Observing {} resource(s) via {}", ids.len(), self.control_plane.name());

        let mut observed = ObservedState::new();
        for id in ids {
            let label = id.to_string();
            let found = self
                .retry
                .run(&label, || self.control_plane.describe(id))
                .await
                .map_err(|failure| failure.error)?;

            match found {
                (Some(resource), _) => {
                    debug!("{id}: present");
                    observed.record(resource);
                }
                (None, _) => debug!("{id}: absent"),
            }
        }

        Ok(observed)
    }
}
