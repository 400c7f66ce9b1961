// ============================================================================
// Linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Convoy
//!
//! A declarative, idempotent, and reconcilable deployment orchestrator for
//! container services.
//!
//! ## Overview
//!
//! Convoy replaces a hand-run sequence of infrastructure steps (push an image,
//! create a cluster, register a task definition, start a service behind a
//! load balancer, attach autoscaling) with a desired-state document:
//!
//! - Resources and their dependencies are declared in YAML
//! - A plan orders every operation so dependencies come first
//! - Applying the same document twice makes no changes the second time
//! - Drift between the document and the control plane is detected and repaired
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `convoy.deploy.yaml`
//! 2. **Observed State**: Queried from the control plane before every plan
//! 3. **Plan**: Topologically ordered `Create` / `Update` / `NoOp` operations
//! 4. **Executor**: Applies the plan concurrently, with retries and locking
//!
//! ## Modules
//!
//! - [`config`]: Document parsing and validation
//! - [`state`]: State storage backends (local, S3) and the observed-state cache
//! - [`remote`]: Control plane trait and its HTTP and in-memory implementations
//! - [`planner`]: Dependency graph, diff, plan construction and execution
//! - [`reconciler`]: Apply and reconciliation passes
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: hello-web
//!   environment: dev
//!
//! resources:
//!   - kind: cluster
//!     name: c1
//!   - kind: task_definition
//!     name: t1
//!     depends_on: [c1]
//!     attributes:
//!       image: "registry/hello:1.0"
//!   - kind: service
//!     name: s1
//!     depends_on: [task_definition/t1]
//!     attributes:
//!       desired_count: 2
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, ResourceId, ResourceKind};
pub use error::{ConvoyError, Result};
pub use planner::{CancellationFlag, OperationPlan, PlanBuilder, PlanExecutor};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use remote::{ControlPlane, HttpControlPlane, InMemoryControlPlane};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
