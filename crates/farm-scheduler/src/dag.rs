//! Dependency resolution for packages.
//!
//! Edges point from a dependency to its dependent. Ordering uses Kahn's
//! algorithm with a min-heap keyed on package name, so packages that become
//! ready at the same time are emitted in ascending name order.

use farm_core::error::CycleError;
use farm_core::package::Package;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Deterministic build order plus the filtered dependency sets it was
/// computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrder {
    order: Vec<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl ResolvedOrder {
    /// Packages, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Direct dependencies of `package` restricted to the resolved set.
    pub fn dependencies(&self, package: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(package)
    }

    /// Packages that directly depend on `package`.
    pub fn dependents(&self, package: &str) -> BTreeSet<&str> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(package))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn index_of(&self, package: &str) -> Option<usize> {
        self.order.iter().position(|p| p == package)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builds the package dependency graph and orders it.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a build order for `packages`.
    ///
    /// Dependencies naming packages outside the input set are dropped.
    /// Fails with the first cycle found when no order exists; no partial
    /// order is returned.
    pub fn resolve(
        &self,
        packages: &BTreeMap<String, Package>,
    ) -> Result<ResolvedOrder, CycleError> {
        let dependencies = filter_dependencies(packages);

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut name_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        // BTreeMap iteration keeps node indices stable across runs.
        for name in dependencies.keys() {
            let idx = graph.add_node(name.clone());
            name_to_index.insert(name.as_str(), idx);
        }

        for (name, deps) in &dependencies {
            let dependent = name_to_index[name.as_str()];
            for dep in deps {
                graph.add_edge(name_to_index[dep.as_str()], dependent, ());
            }
        }

        let order = stable_toposort(&graph).map_err(|remaining| CycleError {
            cycle: find_cycle(&graph, &remaining),
        })?;

        debug!(packages = order.len(), "Resolved build order");

        Ok(ResolvedOrder {
            order,
            dependencies,
        })
    }
}

/// Restrict each package's dependencies to names present in the input set.
fn filter_dependencies(packages: &BTreeMap<String, Package>) -> BTreeMap<String, BTreeSet<String>> {
    packages
        .iter()
        .map(|(name, pkg)| {
            let deps = pkg
                .all_dependencies()
                .filter(|dep| packages.contains_key(dep.as_str()))
                .cloned()
                .collect();
            (name.clone(), deps)
        })
        .collect()
}

/// Kahn's algorithm; on failure returns the nodes that never became ready.
fn stable_toposort(graph: &DiGraph<String, ()>) -> Result<Vec<String>, HashSet<NodeIndex>> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(&idx, _)| Reverse((graph[idx].as_str(), idx)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(Reverse((name, idx))) = ready.pop() {
        order.push(name.to_string());
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((graph[next].as_str(), next)));
                }
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
        Err(graph
            .node_indices()
            .filter(|idx| !emitted.contains(graph[*idx].as_str()))
            .collect())
    }
}

/// Find a shortest cycle among the unresolved nodes.
///
/// Picks the strongly connected component containing the alphabetically
/// smallest cyclic package, then walks back to that package by BFS. The
/// result starts with that package and follows dependency edges.
fn find_cycle(graph: &DiGraph<String, ()>, remaining: &HashSet<NodeIndex>) -> Vec<String> {
    let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.iter().all(|idx| remaining.contains(idx)))
        .filter(|component| {
            component.len() > 1
                || component
                    .first()
                    .is_some_and(|&idx| graph.find_edge(idx, idx).is_some())
        })
        .collect();

    for component in &mut components {
        component.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    }
    components.sort_by(|a, b| graph[a[0]].cmp(&graph[b[0]]));

    let Some(component) = components.first() else {
        return Vec::new();
    };
    let start = component[0];
    if graph.find_edge(start, start).is_some() {
        return vec![graph[start].clone()];
    }

    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);
    let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
    let mut closing = None;

    'search: while let Some(current) = queue.pop_front() {
        let mut successors: Vec<NodeIndex> = graph
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|n| members.contains(n))
            .collect();
        successors.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

        for next in successors {
            if next == start {
                closing = Some(current);
                break 'search;
            }
            if visited.insert(next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    let mut path = Vec::new();
    let mut cursor = closing;
    while let Some(idx) = cursor {
        path.push(graph[idx].clone());
        cursor = parent.get(&idx).copied();
    }
    path.reverse();
    path
}
