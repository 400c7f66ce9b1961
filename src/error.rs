//! Error types for the Convoy deployment system.
//!
//! This module provides the error hierarchy for every stage of a deployment:
//! document loading and validation, dependency planning, control plane calls,
//! plan execution, and state persistence.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ResourceId, ResourceKind};

/// The main error type for the Convoy deployment system.
#[derive(Debug, Error)]
pub enum ConvoyError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Control plane errors.
    #[error("Control plane error: {0}")]
    Remote(#[from] RemoteError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("{}", describe_validation(.message, .field.as_deref(), .resource.as_ref()))]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
        /// Resource the field belongs to, when there is one.
        resource: Option<ResourceId>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of the duplicated resource.
        kind: ResourceKind,
        /// The duplicated name.
        name: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle {
        /// Resources on the cycle, in edge order.
        cycle: Vec<ResourceId>,
    },

    /// A dependency reference does not resolve to a declared resource.
    #[error("{resource} depends on unknown resource '{reference}'")]
    UnknownDependency {
        /// Resource declaring the dependency.
        resource: ResourceId,
        /// The unresolved reference.
        reference: String,
    },

    /// A bare dependency name matches resources of several kinds.
    #[error("{resource} has ambiguous dependency '{reference}' (matches {candidates:?})")]
    AmbiguousDependency {
        /// Resource declaring the dependency.
        resource: ResourceId,
        /// The ambiguous reference.
        reference: String,
        /// Matching resources.
        candidates: Vec<ResourceId>,
    },
}

/// Control plane errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Authentication failed.
    #[error("Control plane authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Rate limited.
    #[error("Control plane rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The request timed out.
    #[error("Control plane request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with control plane: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The control plane refused the request.
    #[error("Control plane rejected request: {status} - {message}")]
    Rejected {
        /// HTTP status code (or equivalent).
        status: u16,
        /// Error message from the control plane.
        message: String,
    },

    /// Invalid response from the control plane.
    #[error("Invalid response from control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// An operation failed after retries were exhausted or on a permanent rejection.
    #[error("Operation on {kind} '{resource}' failed after {attempts} attempt(s): {cause}")]
    OperationFailed {
        /// Name of the resource.
        resource: String,
        /// Kind of the resource.
        kind: ResourceKind,
        /// Number of attempts made.
        attempts: u32,
        /// Underlying cause.
        cause: Box<ConvoyError>,
    },

    /// Execution was cancelled between operations.
    #[error("Execution cancelled after {completed} operation(s)")]
    Cancelled {
        /// Operations completed before cancellation.
        completed: usize,
    },

    /// Worker task failed to join.
    #[error("Worker for {resource} aborted: {message}")]
    WorkerAborted {
        /// Resource the worker was operating on.
        resource: ResourceId,
        /// Join error description.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Result type alias for Convoy operations.
pub type Result<T> = std::result::Result<T, ConvoyError>;

fn describe_validation(message: &str, field: Option<&str>, resource: Option<&ResourceId>) -> String {
    match (resource, field) {
        (Some(resource), Some(field)) => format!("{resource}: {field}: {message}"),
        (Some(resource), None) => format!("{resource}: {message}"),
        (None, Some(field)) => format!("{field}: {message}"),
        (None, None) => message.to_string(),
    }
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

impl ConvoyError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and the call may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote(
                RemoteError::RateLimited { .. }
                    | RemoteError::Timeout { .. }
                    | RemoteError::NetworkError { .. }
            )
        )
    }

    /// Returns the delay the remote side asked for, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Remote(RemoteError::RateLimited { retry_after_secs }) => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    /// Returns true for errors found while reading the document or its graph.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config(
                ConfigError::ValidationError { .. }
                    | ConfigError::DuplicateName { .. }
                    | ConfigError::ParseError { .. }
            ) | Self::Plan(_)
        )
    }

    /// Process exit code for this error: 2 for document/graph errors, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.is_validation() { 2 } else { 1 }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
            resource: None,
        }
    }

    /// Creates a validation error attached to a resource.
    #[must_use]
    pub fn resource_validation(
        resource: ResourceId,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
            resource: Some(resource),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
            resource: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }
}

impl ExecutionError {
    /// Returns the resource id this error is about, if any.
    #[must_use]
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            Self::OperationFailed { resource, kind, .. } => Some(ResourceId::new(*kind, resource)),
            Self::WorkerAborted { resource, .. } => Some(resource.clone()),
            Self::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConvoyError::from(RemoteError::RateLimited { retry_after_secs: 1 }).is_transient());
        assert!(ConvoyError::from(RemoteError::timeout("slow")).is_transient());
        assert!(ConvoyError::from(RemoteError::network("reset")).is_transient());
        assert!(!ConvoyError::from(RemoteError::rejected(409, "conflict")).is_transient());
    }

    #[test]
    fn test_exit_codes() {
        let cycle = ConvoyError::from(PlanError::Cycle {
            cycle: vec![ResourceId::new(ResourceKind::Service, "s1")],
        });
        assert_eq!(cycle.exit_code(), 2);

        let failed = ConvoyError::from(ExecutionError::OperationFailed {
            resource: String::from("s1"),
            kind: ResourceKind::Service,
            attempts: 4,
            cause: Box::new(RemoteError::timeout("slow").into()),
        });
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = PlanError::Cycle {
            cycle: vec![
                ResourceId::new(ResourceKind::Cluster, "a"),
                ResourceId::new(ResourceKind::Service, "b"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: cluster/a -> service/b -> cluster/a"
        );
    }

    #[test]
    fn test_validation_message_names_resource() {
        let err = ConfigError::resource_validation(
            ResourceId::new(ResourceKind::TaskDefinition, "t1"),
            "attributes.image",
            "Container image cannot be empty",
        );
        assert_eq!(
            err.to_string(),
            "task_definition/t1: attributes.image: Container image cannot be empty"
        );
    }
}
