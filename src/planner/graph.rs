//! Dependency graph over the declared resources.
//!
//! Nodes are resources in declaration order; an edge `a -> b` means `a`
//! depends on `b`. The topological order uses Kahn's algorithm with a
//! min-heap on declaration index, so independent resources keep the order
//! they were written in.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

use crate::config::{ResourceId, ResourceSpec};
use crate::error::{ConfigError, PlanError, Result};

/// Resolved dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceId>,
    index: HashMap<ResourceId, usize>,
    /// `deps[i]`: declaration indices node `i` depends on, sorted.
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph, resolving every `depends_on` reference.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` for a repeated id, `UnknownDependency` or
    /// `AmbiguousDependency` for references that do not resolve to exactly
    /// one resource.
    pub fn build(specs: &[ResourceSpec]) -> Result<Self> {
        let nodes: Vec<ResourceId> = specs.iter().map(ResourceSpec::id).collect();

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, id) in nodes.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateName {
                    kind: id.kind,
                    name: id.name.clone(),
                }
                .into());
            }
        }

        let mut graph = Self {
            nodes,
            index,
            deps: Vec::with_capacity(specs.len()),
        };

        for (i, spec) in specs.iter().enumerate() {
            let mut resolved = spec
                .depends_on
                .iter()
                .map(|reference| graph.resolve(&graph.nodes[i], reference))
                .collect::<Result<Vec<_>>>()?;
            resolved.sort_unstable();
            resolved.dedup();
            graph.deps.push(resolved);
        }

        debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.deps.iter().map(Vec::len).sum::<usize>()
        );
        Ok(graph)
    }

    /// Resolves a `kind/name` or bare `name` reference to a node index.
    fn resolve(&self, from: &ResourceId, reference: &str) -> Result<usize> {
        let unknown = || PlanError::UnknownDependency {
            resource: from.clone(),
            reference: reference.to_string(),
        };

        if reference.contains('/') {
            let id = ResourceId::parse(reference).map_err(|_| unknown())?;
            return self.index.get(&id).copied().ok_or_else(|| unknown().into());
        }

        let candidates: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, id)| id.name == reference)
            .map(|(i, _)| i)
            .collect();

        match candidates.as_slice() {
            [] => Err(unknown().into()),
            [single] => Ok(*single),
            _ => Err(PlanError::AmbiguousDependency {
                resource: from.clone(),
                reference: reference.to_string(),
                candidates: candidates.iter().map(|&i| self.nodes[i].clone()).collect(),
            }
            .into()),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of the node at a declaration index.
    #[must_use]
    pub fn id(&self, node: usize) -> &ResourceId {
        &self.nodes[node]
    }

    /// Declaration index of a resource.
    #[must_use]
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Direct dependencies of a node, as declaration indices.
    #[must_use]
    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.deps[node]
    }

    /// Returns declaration indices in dependency order.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Cycle` naming the resources on one cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.nodes.len();
        let mut pending: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); n];
        for (node, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &dependents[node] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < n {
            let cycle = self.find_cycle(&pending);
            return Err(PlanError::Cycle { cycle }.into());
        }
        Ok(order)
    }

    /// Walks dependency edges among unsorted nodes until one repeats.
    ///
    /// Every unsorted node has an unsorted dependency, so the walk always
    /// closes a loop.
    fn find_cycle(&self, pending: &[usize]) -> Vec<ResourceId> {
        let Some(start) = pending.iter().position(|&count| count > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen_at: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut current = start;

        loop {
            let Some(&next) = self.deps[current].iter().find(|&&d| pending[d] > 0) else {
                return path.iter().map(|&i| self.nodes[i].clone()).collect();
            };
            if let Some(&pos) = seen_at.get(&next) {
                return path[pos..].iter().map(|&i| self.nodes[i].clone()).collect();
            }
            seen_at.insert(next, path.len());
            path.push(next);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterAttributes, ResourceAttributes, ResourceKind, ServiceAttributes};

    fn cluster(name: &str, deps: &[&str]) -> ResourceSpec {
        ResourceSpec {
            name: name.to_string(),
            attributes: ResourceAttributes::Cluster(ClusterAttributes {
                capacity_providers: vec![String::from("FARGATE")],
                container_insights: false,
            }),
            depends_on: deps.iter().map(ToString::to_string).collect(),
        }
    }

    fn service(name: &str, deps: &[&str]) -> ResourceSpec {
        ResourceSpec {
            name: name.to_string(),
            attributes: ResourceAttributes::Service(ServiceAttributes {
                desired_count: 1,
                launch_type: String::from("FARGATE"),
                port: None,
            }),
            depends_on: deps.iter().map(ToString::to_string).collect(),
        }
    }

    fn names(graph: &DependencyGraph, order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| graph.id(i).name.clone()).collect()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let specs = vec![service("s1", &["cluster/c2"]), cluster("c1", &[]), cluster("c2", &["c1"])];
        let graph = DependencyGraph::build(&specs).unwrap();
        let order = graph.topological_order().unwrap();

        assert_eq!(names(&graph, &order), vec!["c1", "c2", "s1"]);
    }

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let specs = vec![cluster("z", &[]), cluster("a", &[]), cluster("m", &[])];
        let graph = DependencyGraph::build(&specs).unwrap();

        assert_eq!(names(&graph, &graph.topological_order().unwrap()), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_cycle_names_its_members() {
        let specs = vec![
            cluster("free", &[]),
            cluster("a", &["service/b"]),
            service("b", &["cluster/a"]),
        ];
        let graph = DependencyGraph::build(&specs).unwrap();
        let err = graph.topological_order().unwrap_err();

        match err {
            crate::error::ConvoyError::Plan(PlanError::Cycle { cycle }) => {
                assert_eq!(
                    cycle,
                    vec![
                        ResourceId::new(ResourceKind::Cluster, "a"),
                        ResourceId::new(ResourceKind::Service, "b"),
                    ]
                );
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = DependencyGraph::build(&[cluster("c1", &["c1"])]).unwrap();
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_unknown_reference() {
        let err = DependencyGraph::build(&[service("s1", &["nope"])]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConvoyError::Plan(PlanError::UnknownDependency { .. })
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_ambiguous_bare_name() {
        let specs = vec![cluster("web", &[]), service("web", &[]), service("s1", &["web"])];
        let err = DependencyGraph::build(&specs).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConvoyError::Plan(PlanError::AmbiguousDependency { .. })
        ));

        let specs = vec![cluster("web", &[]), service("web", &[]), service("s1", &["cluster/web"])];
        assert!(DependencyGraph::build(&specs).is_ok());
    }
}
