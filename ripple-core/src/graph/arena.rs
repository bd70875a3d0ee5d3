//! Graph Arena
//!
//! Owns every node of one reactive graph and the two directed edge sets
//! between them: `dependencies` (what a node read) and `observers` (who read
//! a node). Both directions are kept in sync here so that callers never
//! touch an observer set directly.
//!
//! # Invalidation
//!
//! When a cell changes, [`Graph::mark_changed`] walks its observers:
//!
//! 1. Direct observers are raised to `Dirty`.
//! 2. Everything further downstream is raised to `MaybeDirty`.
//! 3. Active reactions reached by the walk are collected for scheduling,
//!    together with the deriveds on a path to one of them.
//!
//! Every node the walk marks is reported as well, scheduled or not.
//!
//! No body runs during this walk. Recomputation is left to the flush.

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::SlotMap;
use smallvec::SmallVec;

use super::clock::VersionClock;
use super::node::{Computation, Node, NodeId, NodeKind, NodeState};

/// Nodes reached by one invalidation walk, in discovery order.
#[derive(Debug, Default)]
pub(crate) struct Invalidation {
    /// Deriveds that feed at least one active reaction, upstream first.
    pub deriveds: SmallVec<[NodeId; 8]>,
    pub reactions: SmallVec<[NodeId; 8]>,
    /// Every node marked stale, each listed once.
    pub marked: SmallVec<[(NodeKind, NodeId); 8]>,
}

/// The dependency graph of one runtime.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: SlotMap<NodeId, Node>,
    clock: VersionClock,
}

impl Graph {
    pub fn clock(&self) -> &VersionClock {
        &self.clock
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, kind: NodeKind, computation: Option<Arc<dyn Computation>>) -> NodeId {
        self.nodes.insert(Node::new(kind, computation))
    }

    /// Remove a node from the graph, detaching it from both edge sets.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.clear_dependencies(id);
        let mut node = self.nodes.remove(id)?;

        for observer in node.take_observers() {
            if let Some(observer) = self.nodes.get_mut(observer) {
                observer.remove_dependency(id);
            }
        }

        Some(node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(Node::kind)
    }

    pub fn version(&self, id: NodeId) -> Option<u64> {
        self.nodes.get(id).map(Node::version)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Record that `observer` read `dependency` at its current version.
    pub fn add_edge(&mut self, dependency: NodeId, observer: NodeId) {
        if !self.nodes.contains_key(observer) {
            return;
        }
        let Some(dep) = self.nodes.get_mut(dependency) else {
            return;
        };
        dep.insert_observer(observer);
        let version = dep.version();

        if let Some(observer) = self.nodes.get_mut(observer) {
            observer.insert_dependency(dependency, version);
        }
    }

    /// Drop every dependency edge of `id`, in both directions.
    ///
    /// Called before re-running a body so that the new edge set reflects
    /// only the latest evaluation.
    pub fn clear_dependencies(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };

        for dependency in node.take_dependencies().into_keys() {
            if let Some(dep) = self.nodes.get_mut(dependency) {
                dep.remove_observer(id);
            }
        }
    }

    /// Accept a write to a cell: bump its local version and the global clock.
    ///
    /// Returns the cell's new version, or `None` if it no longer exists.
    pub fn record_write(&mut self, id: NodeId) -> Option<u64> {
        let node = self.nodes.get_mut(id)?;
        let version = node.bump_version();
        self.clock.tick();
        Some(version)
    }

    /// Mark everything downstream of `source` stale.
    pub fn mark_changed(&mut self, source: NodeId) -> Invalidation {
        let mut out = Invalidation::default();
        let mut visited = HashMap::new();

        let observers: SmallVec<[NodeId; 8]> = match self.nodes.get(source) {
            Some(node) => node.observers().iter().copied().collect(),
            None => return out,
        };

        for observer in observers {
            self.invalidate(observer, NodeState::Dirty, &mut visited, &mut out);
        }

        out
    }

    /// Raise `id` to `level` and propagate `MaybeDirty` further down.
    ///
    /// Returns whether an active reaction is reachable from `id`.
    fn invalidate(
        &mut self,
        id: NodeId,
        level: NodeState,
        visited: &mut HashMap<NodeId, bool>,
        out: &mut Invalidation,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.raise(level);

        if let Some(&reaches) = visited.get(&id) {
            return reaches;
        }
        visited.insert(id, false);
        out.marked.push((node.kind(), id));

        let reaches = match node.kind() {
            NodeKind::Cell => false,
            NodeKind::Reaction => {
                if node.is_active() {
                    out.reactions.push(id);
                }
                node.is_active()
            }
            NodeKind::Derived => {
                let observers: SmallVec<[NodeId; 8]> = node.observers().iter().copied().collect();
                let position = out.deriveds.len();

                let mut reaches = false;
                for observer in observers {
                    reaches |= self.invalidate(observer, NodeState::MaybeDirty, visited, out);
                }
                if reaches {
                    out.deriveds.insert(position, id);
                }
                reaches
            }
        };

        visited.insert(id, reaches);
        reaches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(graph: &mut Graph, id: NodeId) {
        graph.node_mut(id).unwrap().mark_clean(0);
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::default();

        let cell = graph.add_node(NodeKind::Cell, None);
        let derived = graph.add_node(NodeKind::Derived, None);
        assert_eq!(graph.len(), 2);

        graph.remove_node(cell);
        assert_eq!(graph.len(), 1);
        assert!(!graph.contains(cell));
        assert!(graph.contains(derived));
    }

    #[test]
    fn edges_are_kept_in_both_directions() {
        let mut graph = Graph::default();
        let cell = graph.add_node(NodeKind::Cell, None);
        let derived = graph.add_node(NodeKind::Derived, None);

        graph.record_write(cell);
        graph.add_edge(cell, derived);

        assert!(graph.node(cell).unwrap().observers().contains(&derived));
        assert_eq!(graph.node(derived).unwrap().dependencies().get(&cell), Some(&1));

        graph.clear_dependencies(derived);

        assert!(graph.node(cell).unwrap().observers().is_empty());
        assert!(graph.node(derived).unwrap().dependencies().is_empty());
    }

    #[test]
    fn removing_a_dependency_detaches_observers() {
        let mut graph = Graph::default();
        let cell = graph.add_node(NodeKind::Cell, None);
        let reaction = graph.add_node(NodeKind::Reaction, None);
        graph.add_edge(cell, reaction);

        graph.remove_node(cell);

        assert!(graph.node(reaction).unwrap().dependencies().is_empty());
    }

    #[test]
    fn write_advances_local_and_global_versions() {
        let mut graph = Graph::default();
        let a = graph.add_node(NodeKind::Cell, None);
        let b = graph.add_node(NodeKind::Cell, None);

        assert_eq!(graph.record_write(a), Some(1));
        assert_eq!(graph.record_write(a), Some(2));
        assert_eq!(graph.record_write(b), Some(1));
        assert_eq!(graph.clock().now(), 3);
    }

    #[test]
    fn mark_changed_propagates() {
        let mut graph = Graph::default();

        // cell -> derived1 -> derived2 -> reaction
        let cell = graph.add_node(NodeKind::Cell, None);
        let derived1 = graph.add_node(NodeKind::Derived, None);
        let derived2 = graph.add_node(NodeKind::Derived, None);
        let reaction = graph.add_node(NodeKind::Reaction, None);

        graph.add_edge(cell, derived1);
        graph.add_edge(derived1, derived2);
        graph.add_edge(derived2, reaction);
        for id in [derived1, derived2, reaction] {
            clean(&mut graph, id);
        }

        let reached = graph.mark_changed(cell);

        assert_eq!(reached.deriveds.as_slice(), &[derived1, derived2]);
        assert_eq!(reached.reactions.as_slice(), &[reaction]);
        assert_eq!(graph.node(derived1).unwrap().state(), NodeState::Dirty);
        assert_eq!(graph.node(derived2).unwrap().state(), NodeState::MaybeDirty);
        assert_eq!(graph.node(reaction).unwrap().state(), NodeState::MaybeDirty);
    }

    #[test]
    fn deriveds_without_reactions_are_not_scheduled() {
        let mut graph = Graph::default();
        let cell = graph.add_node(NodeKind::Cell, None);
        let derived = graph.add_node(NodeKind::Derived, None);
        graph.add_edge(cell, derived);
        clean(&mut graph, derived);

        let reached = graph.mark_changed(cell);

        assert!(reached.deriveds.is_empty());
        assert!(reached.reactions.is_empty());
        assert_eq!(reached.marked.as_slice(), &[(NodeKind::Derived, derived)]);
        assert_eq!(graph.node(derived).unwrap().state(), NodeState::Dirty);
    }

    #[test]
    fn diamond_is_visited_once() {
        let mut graph = Graph::default();
        let cell = graph.add_node(NodeKind::Cell, None);
        let left = graph.add_node(NodeKind::Derived, None);
        let right = graph.add_node(NodeKind::Derived, None);
        let reaction = graph.add_node(NodeKind::Reaction, None);

        graph.add_edge(cell, left);
        graph.add_edge(cell, right);
        graph.add_edge(left, reaction);
        graph.add_edge(right, reaction);
        for id in [left, right, reaction] {
            clean(&mut graph, id);
        }

        let reached = graph.mark_changed(cell);

        assert_eq!(reached.reactions.len(), 1);
        assert_eq!(reached.deriveds.len(), 2);
        assert_eq!(reached.marked.len(), 3);
    }

    #[test]
    fn inactive_reactions_are_skipped() {
        let mut graph = Graph::default();
        let cell = graph.add_node(NodeKind::Cell, None);
        let reaction = graph.add_node(NodeKind::Reaction, None);
        graph.add_edge(cell, reaction);
        graph.node_mut(reaction).unwrap().set_active(false);

        assert!(graph.mark_changed(cell).reactions.is_empty());
    }
}
