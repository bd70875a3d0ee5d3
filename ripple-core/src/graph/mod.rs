//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between cells, deriveds and reactions, plus the scheduler that orders
//! their recomputation.
//!
//! # Overview
//!
//! - Nodes live in a generational arena and are addressed by [`NodeId`].
//! - Edges are stored twice: a node's `dependencies` (with the version seen
//!   on read) and each dependency's `observers`.
//! - The graph is dynamic. Re-running a body clears its dependencies first,
//!   so edges always reflect the most recent evaluation.
//!
//! # Design Decisions
//!
//! 1. Edges are explicit id sets rather than object references, so ownership
//!    is plain: the arena holds every body strongly until `dispose`.
//!
//! 2. Invalidation (mark stale, enqueue) and recomputation (flush) are
//!    separate phases and never interleave.

mod arena;
mod clock;
mod node;
mod scheduler;

pub use clock::VersionClock;
pub use node::{NodeId, NodeKind, NodeState};

pub(crate) use arena::Graph;
pub(crate) use node::Computation;
pub(crate) use scheduler::Scheduler;
