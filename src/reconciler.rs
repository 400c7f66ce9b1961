//! Reconciler for maintaining desired state.
//!
//! This module implements the passes that compare the desired document with
//! what the control plane reports and take corrective actions to converge
//! them. `apply` and `reconcile` share one pass; they differ only in the
//! history entry they record and in whether a converged plan is executed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, DeployConfig, ResourceSpec};
use crate::error::{ExecutionError, Result};
use crate::planner::{
    CancellationFlag, DependencyGraph, DiffEngine, ExecutionResult, OperationPlan, PlanBuilder,
    PlanExecutor, ResourceDiff, RetryPolicy,
};
use crate::remote::{ControlPlane, StateObserver};
use crate::state::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, ObservedCache, ObservedState,
    ResourceLocks, StateLock, StateStore, LOCK_REFRESH_INTERVAL,
};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a> {
    /// Desired document.
    config: &'a DeployConfig,
    /// State store.
    state_store: &'a dyn StateStore,
    /// Remote control plane.
    control_plane: Arc<dyn ControlPlane>,
    /// Cancellation shared with the executor.
    cancel: CancellationFlag,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Plan builder.
    builder: PlanBuilder,
    /// Per-resource locks shared by every pass of this reconciler.
    resource_locks: ResourceLocks,
    /// How often the state lock is refreshed during a pass.
    lock_refresh: Duration,
}

/// Result of an apply or reconciliation pass.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Which command produced this pass.
    pub operation: DeploymentOperation,
    /// Whether every planned operation completed.
    pub success: bool,
    /// Resources created.
    pub created: usize,
    /// Resources updated.
    pub updated: usize,
    /// Resources already in the desired state.
    pub unchanged: usize,
    /// Operations that failed.
    pub failed: usize,
    /// Operations never started.
    pub skipped: usize,
    /// Errors encountered.
    pub errors: Vec<String>,
    /// The plan that was executed.
    pub plan: OperationPlan,
    /// Per-operation results, absent when nothing needed to run.
    pub execution: Option<ExecutionResult>,
    /// Final state after the pass.
    #[serde(skip)]
    pub final_state: Option<DeploymentState>,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that are missing or differ.
    pub drifted: Vec<ResourceDiff>,
    /// Total number of resources in the document.
    pub total_resources: usize,
    /// Number of resources the control plane reported.
    pub observed_count: usize,
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.config.project.name)
            .field("state_backend", &self.state_store.backend_type())
            .field("control_plane", &self.control_plane.name())
            .finish_non_exhaustive()
    }
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        config: &'a DeployConfig,
        state_store: &'a dyn StateStore,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            config,
            state_store,
            control_plane,
            cancel: CancellationFlag::new(),
            hasher: ConfigHasher::new(),
            builder: PlanBuilder::new(),
            resource_locks: ResourceLocks::new(),
            lock_refresh: LOCK_REFRESH_INTERVAL,
        }
    }

    /// Sets how often the state lock is refreshed while a pass runs.
    #[must_use]
    pub fn with_lock_refresh(mut self, interval: Duration) -> Self {
        self.lock_refresh = interval.max(Duration::from_millis(1));
        self
    }

    /// Uses the given cancellation flag for execution and watch loops.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Checks the document and its dependency graph without touching anything remote.
    fn checked_specs(&self) -> Result<Vec<ResourceSpec>> {
        let specs = self.config.resource_specs()?;
        DependencyGraph::build(&specs)?.topological_order()?;
        Ok(specs)
    }

    async fn observe(&self) -> Result<ObservedState> {
        let retry = RetryPolicy::from_config(&self.config.execution);
        StateObserver::new(Arc::clone(&self.control_plane), retry)
            .observe(&self.config.resource_ids())
            .await
    }

    /// Observes the control plane and builds the plan, without executing it.
    ///
    /// # Errors
    ///
    /// Returns a validation or plan error for a bad document, before any
    /// remote call; otherwise the first describe failure.
    pub async fn plan(&self) -> Result<OperationPlan> {
        let specs = self.checked_specs()?;
        let observed = self.observe().await?;
        self.builder
            .build_from_specs(&specs, &observed, &self.hasher.hash_config(self.config))
    }

    /// Plans and executes every pending operation.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad document, a held state lock, a failed
    /// observation, or a state store failure. Operation failures are
    /// reported in the result instead.
    pub async fn apply(&self) -> Result<ReconciliationResult> {
        self.locked_pass(DeploymentOperation::Apply).await
    }

    /// Performs one reconciliation pass, executing only when drift exists.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::apply`].
    pub async fn reconcile(&self) -> Result<ReconciliationResult> {
        self.locked_pass(DeploymentOperation::Reconcile).await
    }

    /// Runs reconciliation passes every `interval` until cancelled.
    ///
    /// A failed pass is logged and the loop continues; document errors end it.
    ///
    /// # Errors
    ///
    /// Returns validation and plan errors, which no later pass could fix.
    pub async fn watch(&self, interval: Duration) -> Result<usize> {
        info!(
            "Watching {}/{} every {}s",
            self.config.project.name,
            self.config.project.environment,
            interval.as_secs()
        );

        let mut passes = 0;
        while !self.cancel.is_cancelled() {
            match self.reconcile().await {
                Ok(result) => {
                    passes += 1;
                    if result.success {
                        info!("Pass {passes}: {}", result.summary());
                    } else {
                        warn!("Pass {passes}: {}", result.summary());
                    }
                }
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => {
                    passes += 1;
                    error!("Pass {passes} failed: {e}");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = self.cancel.cancelled() => {}
            }
        }

        info!("Watch stopped after {passes} pass(es)");
        Ok(passes)
    }

    async fn locked_pass(&self, operation: DeploymentOperation) -> Result<ReconciliationResult> {
        info!(
            "Starting {operation} for {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let specs = self.checked_specs()?;
        let mut lock = StateLock::acquire(self.state_store, &operation.to_string()).await?;

        let pass = self.pass(operation, &specs);
        tokio::pin!(pass);
        let period = self.lock_refresh;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut pass => break result,
                _ = refresh.tick() => {
                    if let Err(e) = lock.refresh(self.state_store).await {
                        error!("Failed to refresh state lock {}: {e}", lock.lock_id());
                    }
                }
            }
        };

        lock.release(self.state_store).await;
        result
    }

    async fn pass(
        &self,
        operation: DeploymentOperation,
        specs: &[ResourceSpec],
    ) -> Result<ReconciliationResult> {
        let config_hash = self.hasher.hash_config(self.config);

        let mut state = self.state_store.load().await?.unwrap_or_else(|| {
            DeploymentState::new(&self.config.project.name, &self.config.project.environment)
        });

        let observed = self.observe().await?;
        debug!("Observed {} of {} resource(s)", observed.len(), specs.len());

        let plan = self.builder.build_from_specs(specs, &observed, &config_hash)?;

        let mut result = ReconciliationResult::from_plan(operation, plan);

        if result.plan.is_noop() {
            info!("No changes required - state is converged");
            state.set_observed(observed);
        } else {
            let executor = PlanExecutor::new(Arc::clone(&self.control_plane), &self.config.execution)
                .with_cache(ObservedCache::new(observed))
                .with_resource_locks(self.resource_locks.clone())
                .with_cancellation(self.cancel.clone());

            let execution = executor.execute(&result.plan).await?;
            state.set_observed(executor.cache().snapshot().await);
            result.record_execution(execution);
        }

        state.config_hash.clone_from(&config_hash);
        let touched = result.touched_resources();
        let entry = if result.success {
            DeploymentHistoryEntry::new(operation, &config_hash, touched)
        } else {
            DeploymentHistoryEntry::failed(operation, &config_hash, touched, &result.errors.join("; "))
        };
        state.add_history(entry);

        if let Err(e) = self.state_store.save(&state).await {
            error!("Failed to save state: {e}");
            return Err(e);
        }

        result.final_state = Some(state);
        Ok(result)
    }

    /// Reports drifted resources without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad document or a failed observation.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking for drift in {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let specs = self.checked_specs()?;
        let observed = self.observe().await?;
        let diff = DiffEngine::new().compute_diff(&specs, &observed);

        Ok(DriftReport {
            has_drift: diff.has_changes(),
            drifted: diff.actionable_diffs().into_iter().cloned().collect(),
            total_resources: specs.len(),
            observed_count: observed.len(),
        })
    }
}

impl ReconciliationResult {
    fn from_plan(operation: DeploymentOperation, plan: OperationPlan) -> Self {
        Self {
            operation,
            success: true,
            created: 0,
            updated: 0,
            unchanged: plan.operations.len(),
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            plan,
            execution: None,
            final_state: None,
        }
    }

    fn record_execution(&mut self, execution: ExecutionResult) {
        use crate::planner::{Action, OperationStatus};

        let applied = |call: Action| {
            execution
                .results
                .iter()
                .filter(|r| r.status == OperationStatus::Applied && r.call == Some(call))
                .count()
        };
        self.created = applied(Action::Create);
        self.updated = applied(Action::Update);
        self.unchanged = execution.unchanged;
        self.failed = execution.failed;
        self.skipped = execution.skipped;
        self.success = execution.all_successful();

        self.errors = execution.failures().filter_map(|r| r.error.clone()).collect();
        if execution.cancelled {
            let completed = execution.applied + execution.unchanged;
            self.errors.push(ExecutionError::Cancelled { completed }.to_string());
        }

        self.execution = Some(execution);
    }

    /// Resources this pass changed, or all pending resources when it failed.
    fn touched_resources(&self) -> Vec<String> {
        match &self.execution {
            Some(execution) if self.success => execution.changed_resources(),
            _ => self.plan.pending().iter().map(|op| op.resource.to_string()).collect(),
        }
    }

    /// One-line summary of the pass.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} unchanged, {} failed, {} skipped",
            self.created, self.updated, self.unchanged, self.failed, self.skipped
        )
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for diff in &self.drifted {
                writeln!(f, "  - {diff}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "{} {status}:", capitalize(&self.operation.to_string()))?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        if self.failed > 0 || self.skipped > 0 {
            writeln!(f, "  Failed: {}", self.failed)?;
            writeln!(f, "  Skipped: {}", self.skipped)?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}
