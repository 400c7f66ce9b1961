//! Configuration module for the Convoy deployment system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `convoy.deploy.yaml`
//! - The typed resource descriptor model
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AttributeMap, ClusterAttributes, ControlPlaneConfig, DeployConfig, ExecutionConfig,
    FailurePolicy, ProjectConfig, RegistryAttributes, ResourceAttributes, ResourceDocument,
    ResourceId, ResourceKind, ResourceSpec, ScalingPolicyAttributes, ServiceAttributes,
    StateBackend, StateConfig, TargetGroupAttributes, TaskDefinitionAttributes,
};
pub use parser::{apply_env_overrides, find_config_file, ConfigParser, API_TOKEN_VAR, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
pub use hash::ConfigHasher;
