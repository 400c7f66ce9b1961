//! Planning module for deployment operations.
//!
//! This module turns the desired document and the observed state into an
//! ordered operation plan, and applies that plan against the control plane:
//! - Dependency graph resolution and topological ordering
//! - Attribute-level diffing
//! - Plan construction
//! - Concurrent execution with retries

mod graph;
mod diff;
mod plan;
mod retry;
mod executor;

pub use graph::DependencyGraph;
pub use diff::{values_equal, DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use plan::{Action, Operation, OperationPlan, PlanBuilder};
pub use retry::{RetryFailure, RetryPolicy};
pub use executor::{
    CancellationFlag, ExecutionResult, OperationResult, OperationStatus, PlanExecutor,
};
