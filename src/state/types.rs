//! State types for tracking deployment state.
//!
//! These types represent the observed/recorded state of deployed resources,
//! used for planning, reconciliation and idempotent re-apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AttributeMap, ResourceId};
use crate::remote::RemoteResource;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in the state document.
const MAX_HISTORY: usize = 100;

/// Last-known remote attributes, keyed by resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservedState {
    resources: BTreeMap<ResourceId, ObservedResource>,
}

/// A single observed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Attributes as reported by the control plane.
    pub attributes: AttributeMap,
    /// Identifier assigned by the control plane, if any.
    #[serde(default)]
    pub remote_id: Option<String>,
    /// When this entry was last refreshed.
    pub observed_at: DateTime<Utc>,
}

/// The complete persisted deployment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied document.
    pub config_hash: String,
    /// Last observed remote state.
    #[serde(default)]
    pub observed: ObservedState,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Deployment history (recent entries).
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the run occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: DeploymentOperation,
    /// Document hash at time of the run.
    pub config_hash: String,
    /// Resources mutated by the run.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of deployment runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Explicit apply.
    Apply,
    /// Reconciliation pass.
    Reconcile,
}

impl ObservedState {
    /// Creates an empty observed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a resource by id.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ObservedResource> {
        self.resources.get(id)
    }

    /// Returns true if the resource is known to exist remotely.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Records a resource as reported by the control plane.
    pub fn record(&mut self, resource: RemoteResource) {
        self.resources.insert(
            resource.id,
            ObservedResource {
                attributes: resource.attributes,
                remote_id: resource.remote_id,
                observed_at: Utc::now(),
            },
        );
    }

    /// Forgets a resource (it was observed to be absent).
    pub fn remove(&mut self, id: &ResourceId) -> Option<ObservedResource> {
        self.resources.remove(id)
    }

    /// Returns the number of observed resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterates over observed resources in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ObservedResource)> {
        self.resources.iter()
    }
}

impl DeploymentState {
    /// Creates a new empty deployment state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            observed: ObservedState::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Replaces the observed state.
    pub fn set_observed(&mut self, observed: ObservedState) {
        self.observed = observed;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, keeping only the most recent ones.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }
}

impl DeploymentHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Reconcile => "reconcile",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;

    fn remote(name: &str, desired_count: u32) -> RemoteResource {
        RemoteResource {
            id: ResourceId::new(ResourceKind::Service, name),
            attributes: AttributeMap::from([(
                String::from("desired_count"),
                serde_json::json!(desired_count),
            )]),
            remote_id: Some(format!("arn:service/{name}")),
        }
    }

    #[test]
    fn test_observed_state_json_uses_string_keys() {
        let mut observed = ObservedState::new();
        observed.record(remote("s1", 2));

        let json = serde_json::to_value(&observed).unwrap();
        assert!(json.get("service/s1").is_some());

        let back: ObservedState = serde_json::from_value(json).unwrap();
        assert_eq!(back, observed);
    }

    #[test]
    fn test_record_overwrites() {
        let mut observed = ObservedState::new();
        observed.record(remote("s1", 2));
        observed.record(remote("s1", 4));

        let id = ResourceId::new(ResourceKind::Service, "s1");
        assert_eq!(observed.len(), 1);
        assert_eq!(observed.get(&id).unwrap().attributes["desired_count"], 4);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("app", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Apply,
                &i.to_string(),
                vec![],
            ));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }
}
