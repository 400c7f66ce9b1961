//! Plan executor for applying operation plans.
//!
//! Operations run on a bounded pool of tokio tasks. An operation starts only
//! once every dependency has completed, ready operations start in plan order,
//! and work on a single resource is serialized through a per-resource lock.
//! Each attempt re-describes the resource first, so a create that timed out
//! after actually succeeding is not issued twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionConfig, FailurePolicy, ResourceId};
use crate::error::{ExecutionError, Result};
use crate::remote::{ControlPlane, RemoteResource};
use crate::state::{ObservedCache, ResourceLocks};

use super::diff::DiffEngine;
use super::plan::{Action, Operation, OperationPlan};
use super::retry::RetryPolicy;

/// Shared flag checked between operations.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    /// Creates a flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Operations already running are not interrupted.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Executor for operation plans.
pub struct PlanExecutor {
    worker: Arc<Worker>,
    concurrency: usize,
    failure_policy: FailurePolicy,
    cancel: CancellationFlag,
}

/// What one worker needs, shared by all of them.
struct Worker {
    control_plane: Arc<dyn ControlPlane>,
    cache: ObservedCache,
    locks: ResourceLocks,
    retry: RetryPolicy,
}

/// Final status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// A mutating call was made and succeeded.
    Applied,
    /// Nothing needed to change.
    Unchanged,
    /// The operation failed.
    Failed,
    /// The operation was never started.
    Skipped,
}

/// Result of executing a single operation.
#[derive(Debug, Serialize)]
pub struct OperationResult {
    /// Plan index.
    pub index: usize,
    /// Target resource.
    pub resource: ResourceId,
    /// Planned action.
    pub action: Action,
    /// Outcome.
    pub status: OperationStatus,
    /// Mutating call actually issued, if any.
    pub call: Option<Action>,
    /// Attempts made (0 if nothing was called).
    pub attempts: u32,
    /// Time spent, in milliseconds.
    pub duration_ms: u64,
    /// Error message, for failed and skipped operations.
    pub error: Option<String>,
    /// Structured failure.
    #[serde(skip)]
    pub failure: Option<ExecutionError>,
}

/// Result of executing the entire plan.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    /// Individual results, in plan order.
    pub results: Vec<OperationResult>,
    /// Operations that issued a mutating call.
    pub applied: usize,
    /// Operations that needed no change.
    pub unchanged: usize,
    /// Failed operations.
    pub failed: usize,
    /// Operations never started.
    pub skipped: usize,
    /// Whether execution stopped because of cancellation.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

struct Applied {
    resource: RemoteResource,
    call: Option<Action>,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("control_plane", &self.worker.control_plane.name())
            .field("retry", &self.worker.retry)
            .field("concurrency", &self.concurrency)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl PlanExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: &ExecutionConfig) -> Self {
        Self {
            worker: Arc::new(Worker {
                control_plane,
                cache: ObservedCache::default(),
                locks: ResourceLocks::new(),
                retry: RetryPolicy::from_config(config),
            }),
            concurrency: config.concurrency.max(1),
            failure_policy: config.failure_policy,
            cancel: CancellationFlag::new(),
        }
    }

    /// Uses an existing observed-state cache.
    #[must_use]
    pub fn with_cache(mut self, cache: ObservedCache) -> Self {
        self.rebuild_worker(|w| w.cache = cache);
        self
    }

    /// Shares a per-resource lock table with other executors.
    ///
    /// Within one process the table serializes work on a resource across
    /// passes; the state lock is what guards against other processes.
    #[must_use]
    pub fn with_resource_locks(mut self, locks: ResourceLocks) -> Self {
        self.rebuild_worker(|w| w.locks = locks);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.rebuild_worker(|w| w.retry = retry);
        self
    }

    /// Uses the given cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The observed-state cache updated by this executor.
    #[must_use]
    pub fn cache(&self) -> &ObservedCache {
        &self.worker.cache
    }

    fn rebuild_worker(&mut self, change: impl FnOnce(&mut Worker)) {
        let mut worker = Worker {
            control_plane: Arc::clone(&self.worker.control_plane),
            cache: self.worker.cache.clone(),
            locks: self.worker.locks.clone(),
            retry: self.worker.retry,
        };
        change(&mut worker);
        self.worker = Arc::new(worker);
    }

    /// Executes an operation plan.
    ///
    /// Failures are reported per operation in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for setup failures.
    pub async fn execute(&self, plan: &OperationPlan) -> Result<ExecutionResult> {
        let ops = &plan.operations;
        info!(
            "Executing plan with {} operation(s) ({} pending, concurrency {})",
            ops.len(),
            plan.pending().len(),
            self.concurrency
        );

        let mut slots = vec![Slot::Pending; ops.len()];
        let mut results: Vec<Option<OperationResult>> = ops.iter().map(|_| None).collect();
        let mut workers: JoinSet<OperationResult> = JoinSet::new();
        let mut in_flight = 0;
        let mut halted = false;
        let mut cancelled = false;

        loop {
            if !halted && self.cancel.is_cancelled() {
                warn!("Cancellation requested; not starting further operations");
                halted = true;
                cancelled = true;
            }

            if !halted {
                for op in ops {
                    if in_flight >= self.concurrency {
                        break;
                    }
                    if slots[op.index] != Slot::Pending {
                        continue;
                    }

                    let blocked = op
                        .dependencies
                        .iter()
                        .any(|&d| matches!(slots[d], Slot::Failed | Slot::Skipped));
                    if blocked {
                        debug!("{}: skipped, a dependency did not complete", op.resource);
                        slots[op.index] = Slot::Skipped;
                        results[op.index] = Some(OperationResult::skipped(op, "dependency failed"));
                        continue;
                    }
                    if !op.dependencies.iter().all(|&d| slots[d] == Slot::Done) {
                        continue;
                    }

                    if op.action == Action::NoOp {
                        slots[op.index] = Slot::Done;
                        results[op.index] = Some(OperationResult::unchanged(op));
                        continue;
                    }

                    slots[op.index] = Slot::Running;
                    in_flight += 1;
                    workers.spawn(supervise(Arc::clone(&self.worker), op.clone()));
                }
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            in_flight -= 1;

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("Worker supervisor failed: {e}");
                    halted = true;
                    continue;
                }
            };

            if result.status == OperationStatus::Failed {
                slots[result.index] = Slot::Failed;
                if self.failure_policy == FailurePolicy::FailFast && !halted {
                    warn!("{} failed; not starting further operations", result.resource);
                    halted = true;
                }
            } else {
                slots[result.index] = Slot::Done;
            }
            let index = result.index;
            results[index] = Some(result);
        }

        let reason = if cancelled { "cancelled" } else { "halted after failure" };
        let results: Vec<OperationResult> = results
            .into_iter()
            .zip(ops)
            .map(|(result, op)| result.unwrap_or_else(|| OperationResult::skipped(op, reason)))
            .collect();

        let result = ExecutionResult::from_results(results, cancelled);
        info!("{result}");
        Ok(result)
    }
}

/// Runs one operation in its own task so a panic still yields a result.
async fn supervise(worker: Arc<Worker>, op: Operation) -> OperationResult {
    let started = Instant::now();
    let (index, resource, action) = (op.index, op.resource.clone(), op.action);

    match tokio::spawn(run_operation(worker, op)).await {
        Ok(result) => result,
        Err(e) => {
            let failure = ExecutionError::WorkerAborted {
                resource: resource.clone(),
                message: e.to_string(),
            };
            OperationResult {
                index,
                resource,
                action,
                status: OperationStatus::Failed,
                call: None,
                attempts: 0,
                duration_ms: elapsed_ms(started),
                error: Some(failure.to_string()),
                failure: Some(failure),
            }
        }
    }
}

async fn run_operation(worker: Arc<Worker>, op: Operation) -> OperationResult {
    let started = Instant::now();
    let _guard = worker.locks.lock(&op.resource).await;
    let label = op.resource.to_string();
    debug!("{label}: starting {}", op.action);

    let outcome = worker.retry.run(&label, || worker.apply_once(&op)).await;

    match outcome {
        Ok((applied, attempts)) => {
            let status = if applied.call.is_some() {
                info!("{label}: {} succeeded", op.action);
                OperationStatus::Applied
            } else {
                info!("{label}: already in desired state");
                OperationStatus::Unchanged
            };
            worker.cache.record(applied.resource).await;

            OperationResult {
                index: op.index,
                resource: op.resource,
                action: op.action,
                status,
                call: applied.call,
                attempts,
                duration_ms: elapsed_ms(started),
                error: None,
                failure: None,
            }
        }
        Err(failure) => {
            let attempts = failure.attempts;
            let failure = ExecutionError::OperationFailed {
                resource: op.resource.name.clone(),
                kind: op.resource.kind,
                attempts,
                cause: Box::new(failure.error),
            };
            error!("{failure}");

            OperationResult {
                index: op.index,
                resource: op.resource,
                action: op.action,
                status: OperationStatus::Failed,
                call: None,
                attempts,
                duration_ms: elapsed_ms(started),
                error: Some(failure.to_string()),
                failure: Some(failure),
            }
        }
    }
}

impl Worker {
    /// Describes the resource, then creates, updates or leaves it alone.
    async fn apply_once(&self, op: &Operation) -> Result<Applied> {
        let current = self.control_plane.describe(&op.resource).await?;

        match current {
            Some(existing) => {
                let changes = DiffEngine::attribute_changes(&op.spec.attribute_map(), &existing.attributes);
                if changes.is_empty() {
                    if op.action == Action::Create {
                        debug!("{}: already exists with matching attributes", op.resource);
                    }
                    return Ok(Applied {
                        resource: existing,
                        call: None,
                    });
                }
                if op.action == Action::Create {
                    debug!("{}: already exists with different attributes, updating", op.resource);
                }
                let resource = self.control_plane.update(&op.spec).await?;
                Ok(Applied {
                    resource,
                    call: Some(Action::Update),
                })
            }
            None => {
                if op.action == Action::Update {
                    debug!("{}: missing remotely, creating", op.resource);
                }
                let resource = self.control_plane.create(&op.spec).await?;
                Ok(Applied {
                    resource,
                    call: Some(Action::Create),
                })
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl OperationResult {
    fn unchanged(op: &Operation) -> Self {
        Self {
            index: op.index,
            resource: op.resource.clone(),
            action: op.action,
            status: OperationStatus::Unchanged,
            call: None,
            attempts: 0,
            duration_ms: 0,
            error: None,
            failure: None,
        }
    }

    fn skipped(op: &Operation, reason: &str) -> Self {
        Self {
            status: OperationStatus::Skipped,
            error: Some(format!("Skipped: {reason}")),
            ..Self::unchanged(op)
        }
    }
}

impl ExecutionResult {
    fn from_results(results: Vec<OperationResult>, cancelled: bool) -> Self {
        let count = |status: OperationStatus| results.iter().filter(|r| r.status == status).count();
        let applied = count(OperationStatus::Applied);
        let unchanged = count(OperationStatus::Unchanged);
        let failed = count(OperationStatus::Failed);
        let skipped = count(OperationStatus::Skipped);

        Self {
            results,
            applied,
            unchanged,
            failed,
            skipped,
            cancelled,
        }
    }

    /// Returns true if every operation completed.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && !self.cancelled
    }

    /// Number of mutating calls that succeeded.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.results.iter().filter(|r| r.call.is_some()).count()
    }

    /// Resources that were changed, as `kind/name` strings.
    #[must_use]
    pub fn changed_resources(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.status == OperationStatus::Applied)
            .map(|r| r.resource.to_string())
            .collect()
    }

    /// Failed operations.
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| r.status == OperationStatus::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Execution {}: {} applied, {} unchanged, {} failed, {} skipped",
            if self.all_successful() { "complete" } else if self.cancelled { "cancelled" } else { "incomplete" },
            self.applied,
            self.unchanged,
            self.failed,
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, DeployConfig, ResourceKind};
    use crate::error::{ConvoyError, RemoteError};
    use crate::planner::PlanBuilder;
    use crate::remote::{Fault, InMemoryControlPlane, MockControlPlane};
    use crate::state::ObservedState;
    use std::time::Duration;

    const DOCUMENT: &str = r#"
project:
  name: hello-web
resources:
  - kind: cluster
    name: c1
  - kind: task_definition
    name: t1
    depends_on: [c1]
    attributes:
      image: "registry/hello:1.0"
  - kind: service
    name: s1
    depends_on: [t1]
    attributes:
      desired_count: 2
  - kind: registry
    name: hello
"#;

    fn config() -> DeployConfig {
        ConfigParser::new().parse_yaml(DOCUMENT, None).unwrap()
    }

    fn fast(mut config: ExecutionConfig) -> ExecutionConfig {
        config.base_delay_ms = 1;
        config.max_delay_ms = 5;
        config
    }

    fn id(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    async fn apply(cp: &Arc<InMemoryControlPlane>, config: &DeployConfig) -> ExecutionResult {
        let observed = cp_observed(cp, config);
        let plan = PlanBuilder::new().build(config, &observed).unwrap();
        PlanExecutor::new(Arc::clone(cp) as Arc<dyn ControlPlane>, &fast(config.execution.clone()))
            .execute(&plan)
            .await
            .unwrap()
    }

    fn cp_observed(cp: &InMemoryControlPlane, config: &DeployConfig) -> ObservedState {
        let mut observed = ObservedState::new();
        for id in config.resource_ids() {
            if let Some(resource) = cp.get(&id) {
                observed.record(resource);
            }
        }
        observed
    }

    #[tokio::test]
    async fn test_apply_creates_in_dependency_order() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let result = apply(&cp, &config()).await;

        assert!(result.all_successful());
        assert_eq!(result.applied, 4);

        let log: Vec<String> = cp.mutation_log().iter().map(|(id, _)| id.to_string()).collect();
        let pos = |s: &str| log.iter().position(|l| l == s).unwrap();
        assert!(pos("cluster/c1") < pos("task_definition/t1"));
        assert!(pos("task_definition/t1") < pos("service/s1"));
    }

    #[tokio::test]
    async fn test_second_apply_makes_no_mutating_calls() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let config = config();
        apply(&cp, &config).await;
        let before = cp.mutating_calls();

        let second = apply(&cp, &config).await;
        assert_eq!(cp.mutating_calls(), before);
        assert_eq!(second.unchanged, 4);
        assert_eq!(second.mutations(), 0);
    }

    #[tokio::test]
    async fn test_existing_resource_is_not_created_twice() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let config = config();
        apply(&cp, &config).await;

        // Plan as if nothing existed: every op is a Create.
        let plan = PlanBuilder::new().build(&config, &ObservedState::new()).unwrap();
        let result = PlanExecutor::new(Arc::clone(&cp) as Arc<dyn ControlPlane>, &config.execution)
            .execute(&plan)
            .await
            .unwrap();

        assert_eq!(result.unchanged, 4);
        assert_eq!(cp.calls().create, 4);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_times(&id(ResourceKind::Cluster, "c1"), Fault::Timeout, 2);

        let result = apply(&cp, &config()).await;
        assert!(result.all_successful());
        assert_eq!(result.results[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_operation_failed() {
        let s1 = id(ResourceKind::Service, "s1");
        let mut mock = MockControlPlane::new();
        mock.expect_name().return_const("mock");
        mock.expect_describe().times(4).returning(|_| Ok(None));
        mock.expect_create()
            .times(4)
            .returning(|_| Err(ConvoyError::from(RemoteError::timeout("slow"))));

        let mut spec = config().resource_specs().unwrap().remove(2);
        spec.depends_on.clear();
        let plan = PlanBuilder::new()
            .build_from_specs(&[spec], &ObservedState::new(), "hash")
            .unwrap();

        let result = PlanExecutor::new(Arc::new(mock), &ExecutionConfig::default())
            .execute(&plan)
            .await
            .unwrap();

        assert_eq!(result.failed, 1);
        let failed = &result.results[0];
        assert_eq!(failed.resource, s1);
        assert!(matches!(
            failed.failure,
            Some(ExecutionError::OperationFailed { attempts: 4, kind: ResourceKind::Service, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_fails_without_retry() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_always(&id(ResourceKind::Cluster, "c1"), Fault::Reject(400));

        let result = apply(&cp, &config()).await;
        assert_eq!(result.results[0].status, OperationStatus::Failed);
        assert_eq!(result.results[0].attempts, 1);
        assert_eq!(cp.calls().create, 1);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_new_operations() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_always(&id(ResourceKind::Cluster, "c1"), Fault::Reject(400));
        let mut config = config();
        config.execution.concurrency = 1;

        let result = apply(&cp, &config).await;
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 3);
        assert!(cp.get(&id(ResourceKind::Registry, "hello")).is_none());
    }

    #[tokio::test]
    async fn test_continue_independent_runs_other_branches() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_always(&id(ResourceKind::Cluster, "c1"), Fault::Reject(400));
        let mut config = config();
        config.execution.failure_policy = FailurePolicy::ContinueIndependent;

        let result = apply(&cp, &config).await;
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.applied, 1);
        assert!(cp.get(&id(ResourceKind::Registry, "hello")).is_some());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut yaml = String::from("project:\n  name: wide\nresources:\n");
        for i in 0..8 {
            yaml.push_str(&format!("  - kind: cluster\n    name: c{i}\n"));
        }
        let mut config = ConfigParser::new().parse_yaml(&yaml, None).unwrap();
        config.execution.concurrency = 3;

        let cp = Arc::new(InMemoryControlPlane::new().with_latency(Duration::from_millis(20)));
        let result = apply(&cp, &config).await;

        assert_eq!(result.applied, 8);
        assert!(cp.peak_in_flight() <= 3);
        assert!(cp.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let config = config();
        let plan = PlanBuilder::new().build(&config, &ObservedState::new()).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = PlanExecutor::new(Arc::clone(&cp) as Arc<dyn ControlPlane>, &config.execution)
            .with_cancellation(cancel)
            .execute(&plan)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.skipped, 4);
        assert_eq!(cp.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_records_remote_attributes() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let config = config();
        let plan = PlanBuilder::new().build(&config, &ObservedState::new()).unwrap();
        let executor = PlanExecutor::new(Arc::clone(&cp) as Arc<dyn ControlPlane>, &config.execution);

        executor.execute(&plan).await.unwrap();

        let snapshot = executor.cache().snapshot().await;
        assert_eq!(snapshot.len(), 4);
        let s1 = snapshot.get(&id(ResourceKind::Service, "s1")).unwrap();
        assert_eq!(s1.attributes["desired_count"], 2);
        assert!(s1.remote_id.is_some());
    }

    #[tokio::test]
    async fn test_shared_resource_lock_holds_back_work_on_that_resource() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let config = config();
        let plan = PlanBuilder::new().build(&config, &ObservedState::new()).unwrap();
        let locks = ResourceLocks::new();
        let c1 = id(ResourceKind::Cluster, "c1");
        let guard = locks.lock(&c1).await;

        let executor = PlanExecutor::new(Arc::clone(&cp) as Arc<dyn ControlPlane>, &config.execution)
            .with_resource_locks(locks.clone());
        let running = tokio::spawn(async move { executor.execute(&plan).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cp.get(&c1).is_none());
        assert!(cp.get(&id(ResourceKind::Registry, "hello")).is_some());

        drop(guard);
        let result = running.await.unwrap().unwrap();
        assert!(result.all_successful());
        assert!(cp.get(&c1).is_some());
    }
}
