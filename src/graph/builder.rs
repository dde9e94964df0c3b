//! Dependency graph construction and topological ordering.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::error::GraphError;
use crate::model::ResourceNode;

/// DFS visit state for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Directed acyclic graph over declared resources.
///
/// An edge `a -> b` means `b` depends on `a`, either through a property
/// reference or an explicit dependency. Indices are declaration positions.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    /// Direct dependencies of each node, ascending by declaration position.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents of each node, ascending by declaration position.
    dependents: Vec<Vec<usize>>,
    /// Topological order as declaration positions.
    order: Vec<usize>,
    /// Topological position of each node.
    position: Vec<usize>,
}

impl DependencyGraph {
    /// Builds the graph from nodes in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateId`, `GraphError::SelfReference` or
    /// `GraphError::UnknownReference` for malformed input, and
    /// `GraphError::CyclicDependency` naming the cycle if the references
    /// cannot be ordered.
    pub fn build(nodes: Vec<ResourceNode>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateId {
                    id: node.id.clone(),
                });
            }
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            for target in node.dependency_ids() {
                if target == node.id {
                    return Err(GraphError::SelfReference {
                        id: node.id.clone(),
                    });
                }
                let Some(&j) = index.get(target) else {
                    return Err(GraphError::UnknownReference {
                        from: node.id.clone(),
                        target: target.to_string(),
                    });
                };
                dependencies[i].push(j);
                dependents[j].push(i);
            }
        }

        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let order = topological_order(&nodes, &dependencies)?;
        let mut position = vec![0; nodes.len()];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }

        let graph = Self {
            nodes,
            index,
            dependencies,
            dependents,
            order,
            position,
        };

        info!(
            "Built dependency graph: {} resources, {} edges",
            graph.len(),
            graph.edge_count()
        );
        debug!("Topological order: {}", graph.order_ids().join(", "));

        Ok(graph)
    }

    /// Creates a graph with no nodes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Returns true if a node with `id` exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a node by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Iterates nodes in topological order, dependencies first.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Returns node identifiers in topological order.
    #[must_use]
    pub fn order_ids(&self) -> Vec<&str> {
        self.iter_ordered().map(|n| n.id.as_str()).collect()
    }

    /// Returns the topological position of a node.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|&i| self.position[i])
    }

    /// Returns direct dependencies of a node, in declaration order.
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependencies[i]
                .iter()
                .map(|&j| self.nodes[j].id.as_str())
                .collect()
        })
    }

    /// Returns direct dependents of a node, in declaration order.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&j| self.nodes[j].id.as_str())
                .collect()
        })
    }

    /// Returns every transitive dependency of a node.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> BTreeSet<&str> {
        self.walk(id, &self.dependencies)
    }

    /// Returns every transitive dependent of a node.
    #[must_use]
    pub fn descendants(&self, id: &str) -> BTreeSet<&str> {
        self.walk(id, &self.dependents)
    }

    /// Returns true if `ancestor` must complete before `id`.
    #[must_use]
    pub fn depends_on(&self, id: &str, ancestor: &str) -> bool {
        self.ancestors(id).contains(ancestor)
    }

    fn walk<'a>(&'a self, id: &str, edges: &[Vec<usize>]) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };

        let mut stack: Vec<usize> = edges[start].clone();
        while let Some(i) = stack.pop() {
            if seen.insert(self.nodes[i].id.as_str()) {
                stack.extend(edges[i].iter().copied());
            }
        }
        seen
    }
}

/// Depth-first post-order over dependencies, roots taken in declaration order.
///
/// Iterative so deep chains cannot exhaust the stack.
fn topological_order(
    nodes: &[ResourceNode],
    dependencies: &[Vec<usize>],
) -> Result<Vec<usize>, GraphError> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    // Each frame is (node, next dependency slot to examine).
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::Visiting;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, slot) = *frame;
            if let Some(&dep) = dependencies[node].get(slot) {
                frame.1 += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::Visiting;
                        stack.push((dep, 0));
                    }
                    Mark::Visiting => {
                        let start = stack
                            .iter()
                            .position(|&(n, _)| n == dep)
                            .unwrap_or_default();
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|&(n, _)| nodes[n].id.clone())
                            .collect();
                        cycle.push(nodes[dep].id.clone());
                        return Err(GraphError::CyclicDependency { cycle });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
            }
        }
    }

    Ok(order)
}
