//! The build DAG: typed nodes, cycle-checked edges, and wave scheduling.
//!
//! The graph is built single-threaded, then shared immutably; per-node
//! status is the only data that changes afterwards and it changes only
//! through compare-and-swap (see [`BuildNode`]). Edges point from a target
//! to the targets it depends on, and every `add_dependency` call re-proves
//! acyclicity before touching the adjacency lists, so there is no
//! observable instant at which the graph contains a cycle.

use std::collections::HashMap;

use crate::errors::GraphError;
use crate::graph::{BuildNode, BuildStatus};
use crate::model::{Target, TargetId};

/// Opaque handle to a node inside one [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// A directed acyclic graph of build targets.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<BuildNode>,
    index: HashMap<TargetId, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &BuildNode {
        &self.nodes[id.0]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn lookup(&self, target: &TargetId) -> Option<NodeId> {
        self.index.get(target).copied().map(NodeId)
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].dependencies.iter().copied().map(NodeId)
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].dependents.iter().copied().map(NodeId)
    }

    /// Add a target as a new `Pending` node.
    pub fn add_target(&mut self, target: Target) -> Result<NodeId, GraphError> {
        if self.index.contains_key(&target.id) {
            return Err(GraphError::DuplicateTarget { id: target.id });
        }
        let idx = self.nodes.len();
        self.index.insert(target.id.clone(), idx);
        self.nodes.push(BuildNode::new(target));
        Ok(NodeId(idx))
    }

    /// Add the edge `from → to`, meaning *`from` depends on `to`*.
    ///
    /// The cycle check runs before insertion: a DFS from `to` along
    /// dependency edges must not reach `from`, otherwise the new edge would
    /// close a cycle and the graph is left untouched.
    pub fn add_dependency(&mut self, from: &TargetId, to: &TargetId) -> Result<(), GraphError> {
        let from_idx = *self
            .index
            .get(from)
            .ok_or_else(|| GraphError::NodeNotFound { id: from.clone() })?;
        let to_idx = *self
            .index
            .get(to)
            .ok_or_else(|| GraphError::NodeNotFound { id: to.clone() })?;

        if from_idx == to_idx || self.reaches(to_idx, from_idx) {
            return Err(GraphError::CycleDetected {
                from: from.clone(),
                to: to.clone(),
            });
        }

        if !self.nodes[from_idx].dependencies.contains(&to_idx) {
            self.nodes[from_idx].dependencies.push(to_idx);
            self.nodes[to_idx].dependents.push(from_idx);
        }
        Ok(())
    }

    /// Iterative DFS along dependency edges: can `from` reach `goal`?
    fn reaches(&self, from: usize, goal: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == goal {
                return true;
            }
            if std::mem::replace(&mut visited[current], true) {
                continue;
            }
            stack.extend(self.nodes[current].dependencies.iter().copied());
        }
        false
    }

    /// Kahn's algorithm over dependency edges, dependencies first.
    ///
    /// For the returned order, every edge `vᵢ → vⱼ` (i depends on j)
    /// satisfies `i > j`. Ties break on ascending [`TargetId`] so the order
    /// is identical across runs and machines.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();

        // A sorted frontier gives the deterministic tie-break; graphs are
        // built once per run, so the O(n log n) resort is not hot.
        let mut frontier: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        self.sort_by_target_id(&mut frontier);

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = frontier.first().copied() {
            frontier.remove(0);
            order.push(NodeId(idx));
            let mut unlocked = Vec::new();
            for &dependent in &self.nodes[idx].dependents {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    unlocked.push(dependent);
                }
            }
            frontier.extend(unlocked);
            self.sort_by_target_id(&mut frontier);
        }

        if order.len() != self.nodes.len() {
            // Residual predecessors mean a cycle survived construction,
            // which add_dependency is supposed to make impossible.
            let culprit = (0..self.nodes.len())
                .find(|&i| remaining[i] > 0)
                .map(|i| self.nodes[i].target.id.clone())
                .unwrap_or_else(|| TargetId::new("", "unknown"));
            return Err(GraphError::CycleDetected {
                from: culprit.clone(),
                to: culprit,
            });
        }
        Ok(order)
    }

    fn sort_by_target_id(&self, indices: &mut [usize]) {
        indices.sort_by(|&a, &b| self.nodes[a].target.id.cmp(&self.nodes[b].target.id));
    }

    /// Depth-based wave partition.
    ///
    /// Wave *k* holds the nodes whose longest dependency chain down to a
    /// leaf is exactly *k*: leaves land in wave 0, and a node lands one wave
    /// above its deepest dependency. Within a wave, nodes are ordered by
    /// ascending [`TargetId`].
    pub fn wave_schedule(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let order = self.topological_order()?;
        let mut depth = vec![0usize; self.nodes.len()];
        for id in &order {
            let idx = id.0;
            depth[idx] = self.nodes[idx]
                .dependencies
                .iter()
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let wave_count = depth.iter().copied().max().map_or(0, |d| d + 1);
        let mut waves: Vec<Vec<NodeId>> = vec![Vec::new(); wave_count];
        for idx in 0..self.nodes.len() {
            waves[depth[idx]].push(NodeId(idx));
        }
        for wave in &mut waves {
            wave.sort_by(|a, b| self.nodes[a.0].target.id.cmp(&self.nodes[b.0].target.id));
        }
        Ok(waves)
    }

    /// Claim every node whose dependencies are all satisfied and whose own
    /// status is still `Pending`.
    ///
    /// The `Pending → Ready` CAS is the serialization point: concurrent
    /// callers receive disjoint sets, and the returned nodes belong
    /// exclusively to this caller. Results are sorted by [`TargetId`].
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let mut ready = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.status() != BuildStatus::Pending {
                continue;
            }
            let deps_satisfied = node
                .dependencies
                .iter()
                .all(|&d| self.nodes[d].status().is_satisfied());
            if deps_satisfied && node.try_transition(BuildStatus::Pending, BuildStatus::Ready) {
                ready.push(NodeId(idx));
            }
        }
        ready.sort_by(|a, b| self.nodes[a.0].target.id.cmp(&self.nodes[b.0].target.id));
        ready
    }

    /// CAS the node into `new_status`, validating the lifecycle table.
    pub fn mark(&self, id: NodeId, new_status: BuildStatus) -> Result<(), GraphError> {
        let node = &self.nodes[id.0];
        loop {
            let current = node.status();
            if !current.can_transition_to(new_status) {
                return Err(GraphError::InvalidTransition {
                    id: node.target.id.clone(),
                    from: current,
                    to: new_status,
                });
            }
            if node.try_transition(current, new_status) {
                return Ok(());
            }
            // Lost the race; re-read and re-validate.
        }
    }

    /// Whether every node has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status().is_terminal())
    }
}
