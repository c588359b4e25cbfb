//! Dependency graph built from attribute references and ordering hints.
//!
//! Every `${kind.name.attribute}` reference and every `depends_on` entry
//! becomes an edge from the dependent resource to its dependency. The graph
//! rejects cycles and unknown targets, and produces the deterministic
//! topological order the planner schedules in.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{ConfigError, Result, TerraplaneError};
use crate::registry::{ResourceId, ResourceRegistry};

/// Dependency graph over registered resources.
///
/// Edges point from dependent to dependency: `subnet.public -> network.main`
/// means the subnet needs the network in place first.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Adjacency list: resource to the set of resources it depends on.
    edges: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

/// DFS coloring used for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not yet visited.
    White,
    /// On the current DFS path.
    Grey,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    /// Builds the graph from a registry.
    ///
    /// Scans every attribute for references, merges in `depends_on` hints,
    /// verifies all targets exist, and rejects cycles.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` for an edge to an undeclared resource, or
    /// `CyclicDependency` naming the cycle members.
    pub fn build(registry: &ResourceRegistry) -> Result<Self> {
        let mut graph = Self::default();

        for resource in registry.iter() {
            let deps = graph.edges.entry(resource.id.clone()).or_default();

            for value in resource.attributes.values() {
                for reference in value.references() {
                    deps.insert(ResourceId::new(
                        reference.kind.clone(),
                        reference.name.clone(),
                    ));
                }
            }

            for dep in &resource.depends_on {
                deps.insert(dep.clone());
            }
        }

        // Every edge target must be a declared resource
        for (id, deps) in &graph.edges {
            for dep in deps {
                if !registry.contains(dep) {
                    return Err(TerraplaneError::Config(ConfigError::UnknownResource {
                        address: dep.address(),
                        referrer: Some(id.address()),
                    }));
                }
            }
        }

        graph.check_cycles()?;

        debug!(
            "Built dependency graph: {} resources, {} edges",
            graph.edges.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.edges.get(id).map_or_else(Vec::new, |deps| deps.iter().collect())
    }

    /// Returns the resources that directly depend on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node)
            .collect()
    }

    /// Returns every resource that transitively depends on `id`.
    #[must_use]
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![id.clone()];

        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(&current) {
                if found.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }

        found
    }

    /// Returns a deterministic topological order: dependencies before
    /// dependents, ties broken by identity order (kind, then name).
    ///
    /// Implemented as Kahn's algorithm over a `BTreeSet` frontier, so the
    /// same graph always yields the same order.
    #[must_use]
    pub fn topo_order(&self) -> Vec<ResourceId> {
        let mut remaining_deps: BTreeMap<&ResourceId, BTreeSet<&ResourceId>> = self
            .edges
            .iter()
            .map(|(id, deps)| (id, deps.iter().collect()))
            .collect();

        // Frontier of nodes with no unsatisfied dependencies
        let mut ready: BTreeSet<&ResourceId> = remaining_deps
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(next) = ready.pop_first() {
            order.push(next.clone());
            remaining_deps.remove(next);

            for (id, deps) in &mut remaining_deps {
                if deps.remove(next) && deps.is_empty() {
                    ready.insert(id);
                }
            }
        }

        order
    }

    /// Returns the reverse topological order: dependents before
    /// dependencies. Used for destroys.
    #[must_use]
    pub fn reverse_order(&self) -> Vec<ResourceId> {
        let mut order = self.topo_order();
        order.reverse();
        order
    }

    /// Returns the total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Rejects cyclic graphs, reporting the members of the first cycle found.
    fn check_cycles(&self) -> Result<()> {
        let mut marks: BTreeMap<&ResourceId, Mark> =
            self.edges.keys().map(|id| (id, Mark::White)).collect();

        for id in self.edges.keys() {
            if marks.get(id) == Some(&Mark::White) {
                let mut path = Vec::new();
                self.visit(id, &mut marks, &mut path)?;
            }
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a ResourceId,
        marks: &mut BTreeMap<&'a ResourceId, Mark>,
        path: &mut Vec<&'a ResourceId>,
    ) -> Result<()> {
        marks.insert(id, Mark::Grey);
        path.push(id);

        if let Some(deps) = self.edges.get(id) {
            for dep in deps {
                match marks.get(dep) {
                    Some(Mark::Grey) => {
                        // Cycle: everything on the path from dep onward
                        let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|p| p.address()).collect();
                        cycle.push(dep.address());
                        return Err(TerraplaneError::Config(ConfigError::CyclicDependency {
                            cycle,
                        }));
                    }
                    Some(Mark::White) => self.visit(dep, marks, path)?,
                    _ => {}
                }
            }
        }

        path.pop();
        marks.insert(id, Mark::Black);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Reference, Value};
    use std::collections::BTreeMap as Map;

    fn reference(expr: &str) -> Value {
        Value::Reference(Reference::parse(expr).expect("valid reference"))
    }

    fn registry_with(entries: &[(&str, &str, Vec<(&str, Value)>)]) -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        for (kind, name, attrs) in entries {
            let attributes: Map<String, Value> = attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect();
            registry
                .register(*kind, *name, attributes)
                .expect("unique identity");
        }
        registry
    }

    #[test]
    fn test_edges_from_references() {
        let registry = registry_with(&[
            ("network", "main", vec![]),
            (
                "subnet",
                "public",
                vec![("network_id", reference("network.main.id"))],
            ),
        ]);

        let graph = DependencyGraph::build(&registry).expect("acyclic");
        let subnet = ResourceId::new("subnet", "public");
        let deps = graph.dependencies_of(&subnet);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].address(), "network.main");
    }

    #[test]
    fn test_unknown_target_rejected() {
        let registry = registry_with(&[(
            "subnet",
            "public",
            vec![("network_id", reference("network.missing.id"))],
        )]);

        let result = DependencyGraph::build(&registry);
        assert!(matches!(
            result,
            Err(TerraplaneError::Config(ConfigError::UnknownResource { .. }))
        ));
    }

    #[test]
    fn test_cycle_rejected_and_named() {
        let registry = registry_with(&[
            ("network", "a", vec![("peer", reference("network.b.id"))]),
            ("network", "b", vec![("peer", reference("network.a.id"))]),
        ]);

        let err = DependencyGraph::build(&registry).expect_err("cyclic");
        match err {
            TerraplaneError::Config(ConfigError::CyclicDependency { cycle }) => {
                assert!(cycle.contains(&String::from("network.a")));
                assert!(cycle.contains(&String::from("network.b")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle_rejected() {
        let registry = registry_with(&[(
            "network",
            "a",
            vec![("peer", reference("network.a.id"))],
        )]);

        assert!(DependencyGraph::build(&registry).is_err());
    }

    #[test]
    fn test_topo_order_dependencies_first() {
        let registry = registry_with(&[
            ("network", "main", vec![]),
            (
                "subnet",
                "public",
                vec![("network_id", reference("network.main.id"))],
            ),
            (
                "instance",
                "web",
                vec![("subnet_id", reference("subnet.public.id"))],
            ),
        ]);

        let graph = DependencyGraph::build(&registry).expect("acyclic");
        let order: Vec<String> = graph.topo_order().iter().map(ResourceId::address).collect();
        assert_eq!(order, vec!["network.main", "subnet.public", "instance.web"]);
    }

    #[test]
    fn test_topo_order_deterministic_ties() {
        // Two independent subnets both depending on the same network: ties
        // resolve by identity order.
        let registry = registry_with(&[
            ("network", "main", vec![]),
            (
                "subnet",
                "b",
                vec![("network_id", reference("network.main.id"))],
            ),
            (
                "subnet",
                "a",
                vec![("network_id", reference("network.main.id"))],
            ),
        ]);

        let graph = DependencyGraph::build(&registry).expect("acyclic");
        let order: Vec<String> = graph.topo_order().iter().map(ResourceId::address).collect();
        assert_eq!(order, vec!["network.main", "subnet.a", "subnet.b"]);
    }

    #[test]
    fn test_reverse_order() {
        let registry = registry_with(&[
            ("network", "main", vec![]),
            (
                "subnet",
                "public",
                vec![("network_id", reference("network.main.id"))],
            ),
        ]);

        let graph = DependencyGraph::build(&registry).expect("acyclic");
        let order: Vec<String> = graph
            .reverse_order()
            .iter()
            .map(ResourceId::address)
            .collect();
        assert_eq!(order, vec!["subnet.public", "network.main"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let registry = registry_with(&[
            ("network", "main", vec![]),
            (
                "subnet",
                "public",
                vec![("network_id", reference("network.main.id"))],
            ),
            (
                "instance",
                "web",
                vec![("subnet_id", reference("subnet.public.id"))],
            ),
        ]);

        let graph = DependencyGraph::build(&registry).expect("acyclic");
        let network = ResourceId::new("network", "main");
        let dependents = graph.transitive_dependents(&network);
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains(&ResourceId::new("subnet", "public")));
        assert!(dependents.contains(&ResourceId::new("instance", "web")));
    }
}
