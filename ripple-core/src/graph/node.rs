//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! A node carries only graph metadata (state, version, edges); the typed
//! value of a cell or derived lives in its handle, and the body of a
//! derived or reaction is reachable through a type-erased [`Computation`].

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, ReactiveError};

slotmap::new_key_type! {
    /// Arena key for a node in the dependency graph.
    ///
    /// Keys are generational: once a node is disposed its key never
    /// resolves again, even if the slot is reused.
    pub struct NodeId;
}

impl NodeId {
    /// Get a stable integer form of the key, for logs and tooling.
    pub fn raw(&self) -> u64 {
        slotmap::Key::data(self).as_ffi()
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Mutable storage. Cells have observers but no dependencies.
    Cell,

    /// A cached projection. Deriveds are both observers and observable.
    Derived,

    /// A side-effecting subscriber. Reactions have dependencies only.
    Reaction,
}

impl NodeKind {
    /// Flush priority: lower runs first within a pass.
    ///
    /// Cells are never scheduled and have none.
    pub fn priority(&self) -> Option<usize> {
        match self {
            NodeKind::Cell => None,
            NodeKind::Derived => Some(0),
            NodeKind::Reaction => Some(1),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Cell => "cell",
            NodeKind::Derived => "derived",
            NodeKind::Reaction => "reaction",
        };
        f.write_str(name)
    }
}

/// Staleness of a derived or reaction.
///
/// Ordered so that raising a node only ever moves it towards `Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// Up-to-date with every recorded dependency.
    Clean,

    /// Something upstream changed, but only through a derived. The node
    /// recomputes only if a dependency's version actually advanced.
    MaybeDirty,

    /// A direct dependency changed; the node must recompute.
    Dirty,
}

/// A body that the runtime can re-run without knowing its value type.
///
/// Returns whether the observable output changed.
pub(crate) trait Computation: Send + Sync {
    fn run(&self) -> Result<bool, BoxError>;
}

pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// A node in the dependency graph.
pub(crate) struct Node {
    kind: NodeKind,
    state: NodeState,

    /// Local version. Cells bump it on every accepted write, deriveds only
    /// when a recomputation produced a different value.
    version: u64,

    /// Global clock value at the last time this node was known valid.
    global_version_seen: u64,

    /// Cleared on disposal; deferred reactions start inactive.
    active: bool,

    /// Dependency id to the version seen when it was last read,
    /// in first-read order.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this one during their latest evaluation.
    observers: IndexSet<NodeId>,

    /// Strong reference to the body. `None` for cells.
    computation: Option<Arc<dyn Computation>>,

    cleanups: Vec<Cleanup>,
    run_count: usize,

    /// Error from the latest run of a derived, with the global version it
    /// was produced at.
    failure: Option<(u64, ReactiveError)>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind, computation: Option<Arc<dyn Computation>>) -> Self {
        Self {
            kind,
            state: match kind {
                NodeKind::Cell => NodeState::Clean,
                // Start dirty to ensure the first computation happens
                NodeKind::Derived | NodeKind::Reaction => NodeState::Dirty,
            },
            version: 0,
            global_version_seen: 0,
            active: true,
            dependencies: IndexMap::new(),
            observers: IndexSet::new(),
            computation,
            cleanups: Vec::new(),
            run_count: 0,
            failure: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Raise the staleness level. Never lowers it.
    pub fn raise(&mut self, level: NodeState) {
        if level > self.state {
            self.state = level;
        }
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    /// Mark the node valid as of the given global version.
    pub fn mark_clean(&mut self, global_version: u64) {
        self.state = NodeState::Clean;
        self.global_version_seen = global_version;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn global_version_seen(&self) -> u64 {
        self.global_version_seen
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    pub fn computation(&self) -> Option<Arc<dyn Computation>> {
        self.computation.clone()
    }

    pub fn push_cleanup(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }

    pub fn take_cleanups(&mut self) -> Vec<Cleanup> {
        std::mem::take(&mut self.cleanups)
    }

    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn record_run(&mut self) {
        self.run_count += 1;
    }

    /// Remember a failed run. The node stays dirty.
    pub fn record_failure(&mut self, global_version: u64, error: ReactiveError) {
        self.state = NodeState::Dirty;
        self.failure = Some((global_version, error));
    }

    pub fn clear_failure(&mut self) {
        self.failure = None;
    }

    /// The stored failure, if it was produced at `global_version`.
    pub fn failure_at(&self, global_version: u64) -> Option<&ReactiveError> {
        match &self.failure {
            Some((seen, error)) if *seen == global_version => Some(error),
            _ => None,
        }
    }

    pub(super) fn insert_dependency(&mut self, dependency: NodeId, version: u64) {
        self.dependencies.insert(dependency, version);
    }

    pub(super) fn remove_dependency(&mut self, dependency: NodeId) {
        self.dependencies.shift_remove(&dependency);
    }

    pub(super) fn take_dependencies(&mut self) -> IndexMap<NodeId, u64> {
        std::mem::take(&mut self.dependencies)
    }

    pub(super) fn insert_observer(&mut self, observer: NodeId) {
        self.observers.insert(observer);
    }

    pub(super) fn remove_observer(&mut self, observer: NodeId) {
        self.observers.shift_remove(&observer);
    }

    pub(super) fn take_observers(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.observers)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("active", &self.active)
            .field("dependencies", &self.dependencies.len())
            .field("observers", &self.observers.len())
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
