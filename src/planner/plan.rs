//! Operation plan types and construction.
//!
//! A plan is built fresh for every invocation from the document and the
//! observed state, then executed and discarded. It serializes to JSON for
//! `convoy plan --output json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ConfigHasher, DeployConfig, ResourceId, ResourceSpec};
use crate::error::Result;
use crate::state::ObservedState;

use super::diff::{DiffDetail, DiffEngine, DiffType};
use super::graph::DependencyGraph;

/// A complete, ordered operation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the document this plan is based on.
    pub config_hash: String,
    /// Operations in execution order. Dependencies always come first.
    pub operations: Vec<Operation>,
}

/// A single planned operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Position of this operation in the plan.
    pub index: usize,
    /// Target resource.
    pub resource: ResourceId,
    /// What to do.
    pub action: Action,
    /// Desired description of the resource.
    pub spec: ResourceSpec,
    /// Plan indices that must complete first.
    pub dependencies: Vec<usize>,
    /// Why this action was chosen.
    pub reason: String,
    /// Field-level differences behind an update.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<DiffDetail>,
}

/// Types of operations in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Nothing to do.
    NoOp,
}

/// Builds operation plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanBuilder {
    diff: DiffEngine,
}

impl From<DiffType> for Action {
    fn from(diff: DiffType) -> Self {
        match diff {
            DiffType::Create => Self::Create,
            DiffType::Update => Self::Update,
            DiffType::NoChange => Self::NoOp,
        }
    }
}

impl PlanBuilder {
    /// Creates a new plan builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { diff: DiffEngine::new() }
    }

    /// Builds the plan for a whole document.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad attributes, or a plan error for
    /// unresolved references and cycles. Nothing remote is touched.
    pub fn build(&self, config: &DeployConfig, observed: &ObservedState) -> Result<OperationPlan> {
        let specs = config.resource_specs()?;
        let hash = ConfigHasher::new().hash_config(config);
        self.build_from_specs(&specs, observed, &hash)
    }

    /// Builds the plan for a list of typed resources.
    ///
    /// # Errors
    ///
    /// Returns a plan error for unresolved references and cycles.
    pub fn build_from_specs(
        &self,
        specs: &[ResourceSpec],
        observed: &ObservedState,
        config_hash: &str,
    ) -> Result<OperationPlan> {
        let graph = DependencyGraph::build(specs)?;
        let order = graph.topological_order()?;

        let mut plan_index = vec![0; specs.len()];
        for (position, &node) in order.iter().enumerate() {
            plan_index[node] = position;
        }

        let operations: Vec<Operation> = order
            .iter()
            .enumerate()
            .map(|(index, &node)| {
                let spec = &specs[node];
                let diff = self.diff.diff_resource(spec, observed.get(graph.id(node)));
                let action = Action::from(diff.diff_type);

                let mut dependencies: Vec<usize> =
                    graph.dependencies(node).iter().map(|&d| plan_index[d]).collect();
                dependencies.sort_unstable();

                Operation {
                    index,
                    resource: diff.resource,
                    action,
                    spec: spec.clone(),
                    dependencies,
                    reason: reason_for(action, &diff.details),
                    changes: if action == Action::Update { diff.details } else { Vec::new() },
                }
            })
            .collect();

        let plan = OperationPlan {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operations,
        };

        info!(
            "Plan: {} to create, {} to update, {} unchanged",
            plan.count(Action::Create),
            plan.count(Action::Update),
            plan.count(Action::NoOp)
        );
        Ok(plan)
    }
}

fn reason_for(action: Action, details: &[DiffDetail]) -> String {
    match action {
        Action::Create => String::from("not present remotely"),
        Action::NoOp => String::from("up to date"),
        Action::Update => {
            let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
            format!("drift in {}", fields.join(", "))
        }
    }
}

impl OperationPlan {
    /// Returns true if every operation is a no-op.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(|op| op.action == Action::NoOp)
    }

    /// Returns true if the plan has no operations at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.operations.iter().filter(|op| op.action == action).count()
    }

    /// Operations that change something.
    #[must_use]
    pub fn pending(&self) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.action != Action::NoOp)
            .collect()
    }

    /// Plan indices of every operation that depends on `index`, transitively.
    #[must_use]
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut affected = vec![false; self.operations.len()];
        affected[index] = true;
        // Dependencies always precede dependents, so one forward pass suffices.
        for op in &self.operations[index + 1..] {
            if op.dependencies.iter().any(|&d| affected[d]) {
                affected[op.index] = true;
            }
        }
        affected[index] = false;
        (0..affected.len()).filter(|&i| affected[i]).collect()
    }
}

impl Operation {
    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {}", self.resource),
            Action::Update => format!("Update {}", self.resource),
            Action::NoOp => format!("No change for {}", self.resource),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.action, self.resource, self.reason)
    }
}

impl std::fmt::Display for OperationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_noop() {
            return write!(f, "No changes required");
        }

        let pending = self.pending();
        writeln!(f, "Operation Plan ({} operations):", pending.len())?;
        for op in pending {
            writeln!(f, "  {}. {op}", op.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ResourceKind};
    use crate::remote::RemoteResource;
    use crate::state::ObservedState;

    const DOCUMENT: &str = r#"
project:
  name: hello-web
resources:
  - kind: service
    name: s1
    depends_on: [t1]
    attributes:
      desired_count: 2
  - kind: task_definition
    name: t1
    depends_on: [cluster/c1]
    attributes:
      image: "registry/hello:1.0"
      port: 80
  - kind: cluster
    name: c1
"#;

    fn config() -> DeployConfig {
        ConfigParser::new().parse_yaml(DOCUMENT, None).unwrap()
    }

    fn converged(config: &DeployConfig) -> ObservedState {
        let mut observed = ObservedState::new();
        for spec in config.resource_specs().unwrap() {
            observed.record(RemoteResource {
                id: spec.id(),
                attributes: spec.attribute_map(),
                remote_id: Some(format!("remote-{}", spec.name)),
            });
        }
        observed
    }

    #[test]
    fn test_plan_orders_dependencies_first() {
        let plan = PlanBuilder::new().build(&config(), &ObservedState::new()).unwrap();

        let order: Vec<String> = plan.operations.iter().map(|op| op.resource.to_string()).collect();
        assert_eq!(order, vec!["cluster/c1", "task_definition/t1", "service/s1"]);
        assert_eq!(plan.count(Action::Create), 3);
        assert_eq!(plan.operations[1].dependencies, vec![0]);
        assert_eq!(plan.operations[2].dependencies, vec![1]);
    }

    #[test]
    fn test_converged_state_plans_all_noop() {
        let config = config();
        let plan = PlanBuilder::new().build(&config, &converged(&config)).unwrap();

        assert!(plan.is_noop());
        assert!(plan.pending().is_empty());
        assert_eq!(plan.to_string(), "No changes required");
    }

    #[test]
    fn test_external_drift_yields_single_update() {
        let config = config();
        let mut observed = converged(&config);
        let s1 = ResourceId::new(ResourceKind::Service, "s1");
        let mut drifted = observed.get(&s1).unwrap().attributes.clone();
        drifted.insert(String::from("desired_count"), serde_json::json!(4));
        observed.record(RemoteResource {
            id: s1.clone(),
            attributes: drifted,
            remote_id: None,
        });

        let plan = PlanBuilder::new().build(&config, &observed).unwrap();
        let pending = plan.pending();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resource, s1);
        assert_eq!(pending[0].action, Action::Update);
        assert_eq!(pending[0].changes[0].field, "desired_count");
    }

    #[test]
    fn test_cycle_fails_before_planning() {
        let yaml = r"
project:
  name: loop
resources:
  - kind: cluster
    name: a
    depends_on: [b]
  - kind: service
    name: b
    depends_on: [a]
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let err = PlanBuilder::new().build(&config, &ObservedState::new()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("cluster/a -> service/b -> cluster/a"));
    }

    #[test]
    fn test_plan_serializes_to_json() {
        let plan = PlanBuilder::new().build(&config(), &ObservedState::new()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();

        assert_eq!(json["operations"][0]["resource"], "cluster/c1");
        assert_eq!(json["operations"][0]["action"], "create");
        assert_eq!(json["operations"][2]["spec"]["attributes"]["kind"], "service");
    }

    #[test]
    fn test_transitive_dependents_follow_plan_edges() {
        let plan = PlanBuilder::new().build(&config(), &ObservedState::new()).unwrap();
        assert_eq!(plan.transitive_dependents(0), vec![1, 2]);
        assert_eq!(plan.transitive_dependents(1), vec![2]);
        assert!(plan.transitive_dependents(2).is_empty());
    }
}
