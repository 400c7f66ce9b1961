//! Property-based tests for planning over arbitrary dependency graphs.

use std::collections::HashSet;
use std::sync::Arc;

use convoy_deploy::config::{ClusterAttributes, ExecutionConfig, ResourceAttributes, ResourceSpec};
use convoy_deploy::planner::{Action, DependencyGraph, PlanBuilder, PlanExecutor};
use convoy_deploy::remote::{ControlPlane, InMemoryControlPlane};
use convoy_deploy::state::ObservedState;
use proptest::prelude::*;
use tokio_test::block_on;

fn cluster(node: usize, insights: bool, depends_on: Vec<String>) -> ResourceSpec {
    ResourceSpec {
        name: format!("r{node}"),
        attributes: ResourceAttributes::Cluster(ClusterAttributes {
            capacity_providers: vec![String::from("FARGATE")],
            container_insights: insights,
        }),
        depends_on,
    }
}

/// Generates an acyclic document in shuffled declaration order.
///
/// Node `i` may only depend on nodes `j < i`, which rules out cycles; the
/// shuffle keeps declaration order from giving the answer away.
fn arb_dag() -> impl Strategy<Value = Vec<ResourceSpec>> {
    (1usize..12)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
                prop::collection::vec(any::<bool>(), n),
                prop::collection::vec(any::<bool>(), n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            )
        })
        .prop_map(|(edges, insights, qualified, declaration)| {
            declaration
                .into_iter()
                .map(|node| {
                    let depends_on = (0..node)
                        .filter(|&dep| edges[node][dep])
                        .map(|dep| {
                            if qualified[dep] {
                                format!("cluster/r{dep}")
                            } else {
                                format!("r{dep}")
                            }
                        })
                        .collect();
                    cluster(node, insights[node], depends_on)
                })
                .collect()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn topological_order_puts_every_dependency_first(specs in arb_dag()) {
        let graph = DependencyGraph::build(&specs).unwrap();
        let order = graph.topological_order().unwrap();

        prop_assert_eq!(order.len(), specs.len());
        prop_assert_eq!(order.iter().collect::<HashSet<_>>().len(), specs.len());

        let mut position = vec![0; order.len()];
        for (at, &node) in order.iter().enumerate() {
            position[node] = at;
        }
        for node in 0..graph.len() {
            for &dep in graph.dependencies(node) {
                prop_assert!(
                    position[dep] < position[node],
                    "{} planned before its dependency {}",
                    graph.id(node),
                    graph.id(dep)
                );
            }
        }
    }

    #[test]
    fn second_plan_after_apply_is_all_noop(specs in arb_dag()) {
        let builder = PlanBuilder::new();
        let cp = Arc::new(InMemoryControlPlane::new());

        let first = builder.build_from_specs(&specs, &ObservedState::new(), "h").unwrap();
        prop_assert_eq!(first.count(Action::Create), specs.len());
        for op in &first.operations {
            prop_assert!(op.dependencies.iter().all(|&dep| dep < op.index));
        }

        let control_plane = Arc::clone(&cp) as Arc<dyn ControlPlane>;
        let executor = PlanExecutor::new(control_plane, &ExecutionConfig::default());
        let result = block_on(executor.execute(&first)).unwrap();
        prop_assert!(result.all_successful());
        prop_assert_eq!(cp.mutating_calls(), specs.len());

        let mut observed = ObservedState::new();
        for spec in &specs {
            observed.record(cp.get(&spec.id()).unwrap());
        }
        let second = builder.build_from_specs(&specs, &observed, "h").unwrap();
        prop_assert!(second.is_noop());

        let rerun = block_on(executor.execute(&second)).unwrap();
        prop_assert_eq!(rerun.mutations(), 0);
        prop_assert_eq!(cp.mutating_calls(), specs.len());
    }
}
