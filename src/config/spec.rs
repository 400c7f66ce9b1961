//! Configuration specification types for the deployment system.
//!
//! This module defines all the structs that map to the `convoy.deploy.yaml` file.
//! Resources are read in two stages: a loose [`ResourceDocument`] straight from
//! YAML, then a typed [`ResourceSpec`] whose attributes are a tagged variant per
//! [`ResourceKind`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Canonical attribute form used for comparing desired and observed resources.
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

/// The root structure of a deployment document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Control plane connection settings.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// Executor tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Desired resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDocument>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Control plane connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane API.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum number of operations in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// What to do with the rest of the plan after a failure.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Behaviour of the executor once an operation has failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop issuing new operations after the first failure.
    #[default]
    FailFast,
    /// Skip only operations that depend on the failed one.
    ContinueIndependent,
}

/// Kinds of infrastructure resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Container image registry repository.
    Registry,
    /// Container orchestration cluster.
    Cluster,
    /// Task (container) definition.
    TaskDefinition,
    /// Long-running service.
    Service,
    /// Load balancer target group.
    TargetGroup,
    /// Autoscaling policy.
    ScalingPolicy,
}

/// Identity of a resource: its kind and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name, unique within its kind.
    pub name: String,
}

/// A resource entry as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDocument {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// Kind-specific attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// References to resources that must exist first (`kind/name` or `name`).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A typed resource description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Resource name.
    pub name: String,
    /// Typed attributes, one variant per kind.
    pub attributes: ResourceAttributes,
    /// References to resources that must exist first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Kind-specific attributes of a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceAttributes {
    /// Registry repository attributes.
    Registry(RegistryAttributes),
    /// Cluster attributes.
    Cluster(ClusterAttributes),
    /// Task definition attributes.
    TaskDefinition(TaskDefinitionAttributes),
    /// Service attributes.
    Service(ServiceAttributes),
    /// Target group attributes.
    TargetGroup(TargetGroupAttributes),
    /// Scaling policy attributes.
    ScalingPolicy(ScalingPolicyAttributes),
}

/// Registry repository attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegistryAttributes {
    /// Scan images when they are pushed.
    #[serde(default)]
    pub scan_on_push: bool,
    /// Tag mutability (`MUTABLE` or `IMMUTABLE`).
    #[serde(default = "default_tag_mutability")]
    pub image_tag_mutability: String,
}

/// Cluster attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClusterAttributes {
    /// Capacity providers attached to the cluster.
    #[serde(default = "default_capacity_providers")]
    pub capacity_providers: Vec<String>,
    /// Whether container insights are enabled.
    #[serde(default)]
    pub container_insights: bool,
}

/// Task definition attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinitionAttributes {
    /// Container image URI.
    pub image: String,
    /// CPU units.
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Memory in MiB.
    #[serde(default = "default_memory")]
    pub memory: u32,
    /// Container port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Service attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceAttributes {
    /// Number of tasks to keep running.
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    /// Launch type.
    #[serde(default = "default_launch_type")]
    pub launch_type: String,
    /// Port published through the load balancer.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Target group attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TargetGroupAttributes {
    /// Target port.
    #[serde(default = "default_target_port")]
    pub port: u16,
    /// Protocol (`HTTP`, `HTTPS` or `TCP`).
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Health check path.
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

/// Scaling policy attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScalingPolicyAttributes {
    /// Minimum task count.
    #[serde(default = "default_capacity")]
    pub min_capacity: u32,
    /// Maximum task count.
    #[serde(default = "default_capacity")]
    pub max_capacity: u32,
    /// Target average CPU utilization, in percent.
    #[serde(default)]
    pub target_cpu_utilization: Option<f64>,
}

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_concurrency() -> usize {
    4
}

fn default_tag_mutability() -> String {
    String::from("MUTABLE")
}

fn default_capacity_providers() -> Vec<String> {
    vec![String::from("FARGATE")]
}

const fn default_cpu() -> u32 {
    256
}

const fn default_memory() -> u32 {
    512
}

const fn default_desired_count() -> u32 {
    1
}

fn default_launch_type() -> String {
    String::from("FARGATE")
}

const fn default_target_port() -> u16 {
    80
}

fn default_protocol() -> String {
    String::from("HTTP")
}

fn default_health_check_path() -> String {
    String::from("/")
}

const fn default_capacity() -> u32 {
    1
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            concurrency: default_concurrency(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ResourceKind {
    /// All kinds, in the order they usually appear in a deployment.
    pub const ALL: [Self; 6] = [
        Self::Registry,
        Self::Cluster,
        Self::TaskDefinition,
        Self::Service,
        Self::TargetGroup,
        Self::ScalingPolicy,
    ];

    /// Returns the document spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::TargetGroup => "target_group",
            Self::ScalingPolicy => "scaling_policy",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown resource kind: {s}"))
    }
}

impl ResourceId {
    /// Creates a new resource id.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parses a `kind/name` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string has no `/` or the kind is unknown.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid resource id: {s}. Expected format: KIND/NAME"))?;
        if name.is_empty() {
            return Err(format!("Invalid resource id: {s}. Name is empty"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl ResourceDocument {
    /// Returns the id of this resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, &self.name)
    }

    /// Converts the loose document entry into a typed spec.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the attributes do not fit the kind.
    pub fn to_spec(&self) -> Result<ResourceSpec, ConfigError> {
        let attributes = ResourceAttributes::from_value(self.kind, self.attributes.clone())
            .map_err(|message| {
                ConfigError::resource_validation(self.id(), "attributes", message)
            })?;

        Ok(ResourceSpec {
            name: self.name.clone(),
            attributes,
            depends_on: self.depends_on.clone(),
        })
    }
}

impl ResourceSpec {
    /// Returns the kind of this resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.attributes.kind()
    }

    /// Returns the id of this resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind(), &self.name)
    }

    /// Returns the desired attributes in canonical form.
    #[must_use]
    pub fn attribute_map(&self) -> AttributeMap {
        self.attributes.to_map()
    }
}

impl ResourceAttributes {
    /// Deserializes the attributes of the given kind from a loose value.
    ///
    /// A missing attribute block is treated as an empty one.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value does not fit the kind.
    pub fn from_value(kind: ResourceKind, value: serde_json::Value) -> Result<Self, String> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other,
        };

        let parsed = match kind {
            ResourceKind::Registry => serde_json::from_value(value).map(Self::Registry),
            ResourceKind::Cluster => serde_json::from_value(value).map(Self::Cluster),
            ResourceKind::TaskDefinition => serde_json::from_value(value).map(Self::TaskDefinition),
            ResourceKind::Service => serde_json::from_value(value).map(Self::Service),
            ResourceKind::TargetGroup => serde_json::from_value(value).map(Self::TargetGroup),
            ResourceKind::ScalingPolicy => serde_json::from_value(value).map(Self::ScalingPolicy),
        };

        parsed.map_err(|e| format!("Invalid {kind} attributes: {e}"))
    }

    /// Returns the kind these attributes describe.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Registry(_) => ResourceKind::Registry,
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::TaskDefinition(_) => ResourceKind::TaskDefinition,
            Self::Service(_) => ResourceKind::Service,
            Self::TargetGroup(_) => ResourceKind::TargetGroup,
            Self::ScalingPolicy(_) => ResourceKind::ScalingPolicy,
        }
    }

    /// Flattens the attributes into a canonical map, defaults included.
    ///
    /// Unset optional attributes are left out of the map.
    #[must_use]
    pub fn to_map(&self) -> AttributeMap {
        let value = match self {
            Self::Registry(a) => serde_json::to_value(a),
            Self::Cluster(a) => serde_json::to_value(a),
            Self::TaskDefinition(a) => serde_json::to_value(a),
            Self::Service(a) => serde_json::to_value(a),
            Self::TargetGroup(a) => serde_json::to_value(a),
            Self::ScalingPolicy(a) => serde_json::to_value(a),
        };

        match value {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
            _ => AttributeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Converts every resource entry into a typed spec, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first attribute error encountered.
    pub fn resource_specs(&self) -> Result<Vec<ResourceSpec>, ConfigError> {
        self.resources.iter().map(ResourceDocument::to_spec).collect()
    }

    /// Returns resource ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(ResourceDocument::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_parse() {
        let id = ResourceId::parse("task_definition/web").unwrap();
        assert_eq!(id.kind, ResourceKind::TaskDefinition);
        assert_eq!(id.name, "web");
        assert_eq!(id.to_string(), "task_definition/web");
    }

    #[test]
    fn test_resource_id_invalid() {
        assert!(ResourceId::parse("web").is_err());
        assert!(ResourceId::parse("database/web").is_err());
        assert!(ResourceId::parse("service/").is_err());
    }

    #[test]
    fn test_attributes_defaults_applied() {
        let attrs = ResourceAttributes::from_value(
            ResourceKind::TaskDefinition,
            serde_json::json!({ "image": "hello:1.0" }),
        )
        .unwrap();

        let map = attrs.to_map();
        assert_eq!(map["image"], "hello:1.0");
        assert_eq!(map["cpu"], 256);
        assert_eq!(map["memory"], 512);
        assert!(!map.contains_key("port"));
    }

    #[test]
    fn test_missing_attributes_block_uses_defaults() {
        let attrs =
            ResourceAttributes::from_value(ResourceKind::Cluster, serde_json::Value::Null).unwrap();
        assert_eq!(attrs.kind(), ResourceKind::Cluster);
        assert_eq!(attrs.to_map()["capacity_providers"], serde_json::json!(["FARGATE"]));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let result = ResourceAttributes::from_value(
            ResourceKind::Service,
            serde_json::json!({ "desired_count": 2, "replicas": 3 }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_attribute_rejected() {
        let doc = ResourceDocument {
            kind: ResourceKind::TaskDefinition,
            name: String::from("t1"),
            attributes: serde_json::json!({ "cpu": 512 }),
            depends_on: vec![],
        };
        let err = doc.to_spec().unwrap_err();
        assert!(err.to_string().starts_with("task_definition/t1: attributes"));
    }
}
