//! Configuration validation for deployment documents.
//!
//! This module checks a document before any planning happens: project and
//! backend settings, resource naming, per-kind attribute rules, and executor
//! tuning. Dependency resolution and cycle detection live in the planner.

use crate::error::{ConfigError, ConvoyError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    DeployConfig, ExecutionConfig, ProjectConfig, ResourceAttributes, ResourceId, ResourceSpec,
    StateBackend, StateConfig,
};

/// Accepted registry tag mutability settings.
const TAG_MUTABILITY: &[&str] = &["MUTABLE", "IMMUTABLE"];

/// Accepted service launch types.
const LAUNCH_TYPES: &[&str] = &["FARGATE", "EC2", "EXTERNAL"];

/// Accepted target group protocols.
const TARGET_PROTOCOLS: &[&str] = &["HTTP", "HTTPS", "TCP"];

/// Validator for deployment documents.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
    /// Resource the field belongs to, if any.
    pub resource: Option<ResourceId>,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment document.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            return Ok(result);
        }

        let first = &result.errors[0];
        Err(ConvoyError::Config(ConfigError::ValidationError {
            message: first.message.clone(),
            field: Some(first.field.clone()),
            resource: first.resource.clone(),
        }))
    }

    /// Collects every issue in a document without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        Self::validate_resources(config, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        if state.backend == StateBackend::S3 && state.bucket.as_deref().is_none_or(str::is_empty) {
            result.error(
                "state.bucket",
                "S3 bucket name is required when using S3 backend",
            );
        }
    }

    /// Validates executor tuning.
    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.concurrency == 0 {
            result.error("execution.concurrency", "Concurrency must be at least 1");
        }

        if execution.base_delay_ms > execution.max_delay_ms {
            result.error(
                "execution.base_delay_ms",
                format!(
                    "Base delay {}ms exceeds max delay {}ms",
                    execution.base_delay_ms, execution.max_delay_ms
                ),
            );
        }

        if execution.max_retries > 10 {
            result.warnings.push(format!(
                "execution.max_retries: {} retries may stall a run for a long time",
                execution.max_retries
            ));
        }
    }

    /// Validates all resource entries.
    fn validate_resources(config: &DeployConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
            return;
        }

        let mut seen: HashSet<ResourceId> = HashSet::new();

        for (i, doc) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            let id = doc.id();

            if !seen.insert(id.clone()) {
                result.resource_error(
                    &id,
                    format!("{prefix}.name"),
                    format!("Duplicate {} name: {}", doc.kind, doc.name),
                );
            }

            if !is_valid_name(&doc.name) {
                result.resource_error(
                    &id,
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        doc.name
                    ),
                );
            }

            match doc.to_spec() {
                Ok(spec) => Self::validate_spec(&spec, &prefix, result),
                Err(ConfigError::ValidationError { message, .. }) => {
                    result.resource_error(&id, format!("{prefix}.attributes"), message);
                }
                Err(other) => {
                    result.resource_error(&id, format!("{prefix}.attributes"), other.to_string());
                }
            }
        }
    }

    /// Validates kind-specific attribute rules.
    fn validate_spec(spec: &ResourceSpec, prefix: &str, result: &mut ValidationResult) {
        let id = spec.id();
        let field = |name: &str| format!("{prefix}.attributes.{name}");

        match &spec.attributes {
            ResourceAttributes::Registry(attrs) => {
                if !TAG_MUTABILITY.contains(&attrs.image_tag_mutability.as_str()) {
                    result.resource_error(
                        &id,
                        field("image_tag_mutability"),
                        format!(
                            "Invalid tag mutability '{}'. Expected: MUTABLE or IMMUTABLE",
                            attrs.image_tag_mutability
                        ),
                    );
                }
            }
            ResourceAttributes::Cluster(attrs) => {
                if attrs.capacity_providers.is_empty() {
                    result.warnings.push(format!(
                        "{}: cluster {} has no capacity providers",
                        field("capacity_providers"),
                        spec.name
                    ));
                }
            }
            ResourceAttributes::TaskDefinition(attrs) => {
                if attrs.image.is_empty() {
                    result.resource_error(&id, field("image"), "Container image cannot be empty");
                } else if attrs.image.ends_with(":latest") || !has_tag(&attrs.image) {
                    result.warnings.push(format!(
                        "{}: untagged or ':latest' images make updates invisible to the planner",
                        field("image")
                    ));
                }
                if attrs.cpu == 0 {
                    result.resource_error(&id, field("cpu"), "CPU units must be positive");
                }
                if attrs.memory == 0 {
                    result.resource_error(&id, field("memory"), "Memory must be positive");
                }
                if attrs.port == Some(0) {
                    result.resource_error(&id, field("port"), "Port 0 is not a valid container port");
                }
            }
            ResourceAttributes::Service(attrs) => {
                if !LAUNCH_TYPES.contains(&attrs.launch_type.as_str()) {
                    result.resource_error(
                        &id,
                        field("launch_type"),
                        format!(
                            "Invalid launch type '{}'. Expected: FARGATE, EC2, or EXTERNAL",
                            attrs.launch_type
                        ),
                    );
                }
                if spec.depends_on.is_empty() {
                    result.warnings.push(format!(
                        "{prefix}.depends_on: service {} declares no dependencies",
                        spec.name
                    ));
                }
            }
            ResourceAttributes::TargetGroup(attrs) => {
                if !TARGET_PROTOCOLS.contains(&attrs.protocol.as_str()) {
                    result.resource_error(
                        &id,
                        field("protocol"),
                        format!(
                            "Invalid protocol '{}'. Expected: HTTP, HTTPS, or TCP",
                            attrs.protocol
                        ),
                    );
                }
                if attrs.port == 0 {
                    result.resource_error(&id, field("port"), "Port 0 is not a valid target port");
                }
                if !attrs.health_check_path.starts_with('/') {
                    result.resource_error(
                        &id,
                        field("health_check_path"),
                        format!("Health check path must be absolute: {}", attrs.health_check_path),
                    );
                }
            }
            ResourceAttributes::ScalingPolicy(attrs) => {
                if attrs.min_capacity > attrs.max_capacity {
                    result.resource_error(
                        &id,
                        field("min_capacity"),
                        format!(
                            "min_capacity {} exceeds max_capacity {}",
                            attrs.min_capacity, attrs.max_capacity
                        ),
                    );
                }
                if let Some(target) = attrs.target_cpu_utilization {
                    if !(target > 0.0 && target <= 100.0) {
                        result.resource_error(
                            &id,
                            field("target_cpu_utilization"),
                            format!("Target CPU utilization must be in (0, 100], got {target}"),
                        );
                    }
                }
            }
        }

        let self_ref = spec
            .depends_on
            .iter()
            .any(|r| r == &spec.name || ResourceId::parse(r).is_ok_and(|dep| dep == id));
        if self_ref {
            result.resource_error(&id, format!("{prefix}.depends_on"), "Resource depends on itself");
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            resource: None,
        });
    }

    fn resource_error(
        &mut self,
        resource: &ResourceId,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            resource: Some(resource.clone()),
        });
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Returns true if an image reference carries an explicit tag or digest.
fn has_tag(image: &str) -> bool {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment.contains(':') || last_segment.contains('@')
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{resource}: {}: {}", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ResourceKind};

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("c1"));
        assert!(is_valid_name("hello-web-2"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("1web"));
        assert!(!is_valid_name("web_app"));
        assert!(!is_valid_name("web-"));
        assert!(!is_valid_name("web--app"));
    }

    #[test]
    fn test_has_tag() {
        assert!(has_tag("hello:1.0"));
        assert!(has_tag("registry.example.com:5000/hello:1.0"));
        assert!(!has_tag("registry.example.com:5000/hello"));
        assert!(has_tag("hello@sha256:abcd"));
    }

    #[test]
    fn test_same_name_different_kind_is_allowed() {
        let config = parse(
            r"
project:
  name: app
resources:
  - kind: cluster
    name: web
  - kind: service
    name: web
    depends_on: [cluster/web]
",
        );
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_name_within_kind() {
        let config = parse(
            r"
project:
  name: app
resources:
  - kind: cluster
    name: c1
  - kind: cluster
    name: c1
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Duplicate cluster name: c1"), "{message}");
        assert!(message.contains("cluster/c1"), "{message}");
    }

    #[test]
    fn test_attribute_rules() {
        let config = parse(
            r"
project:
  name: app
resources:
  - kind: scaling_policy
    name: p1
    attributes:
      min_capacity: 4
      max_capacity: 2
  - kind: target_group
    name: tg
    attributes:
      protocol: UDP
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 2);
        assert_eq!(result.errors[0].resource, Some(ResourceId::new(ResourceKind::ScalingPolicy, "p1")));
        assert_eq!(result.errors[1].field, "resources[1].attributes.protocol");
    }

    #[test]
    fn test_self_dependency() {
        let config = parse(
            r"
project:
  name: app
resources:
  - kind: service
    name: s1
    depends_on: [s1]
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.message.contains("depends on itself")));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = parse(
            r"
project:
  name: app
state:
  backend: s3
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("state.bucket"));
    }

    #[test]
    fn test_latest_tag_warns() {
        let config = parse(
            r"
project:
  name: app
resources:
  - kind: task_definition
    name: t1
    attributes:
      image: hello:latest
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warning_count(), 1);
    }
}
