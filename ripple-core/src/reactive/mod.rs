//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, deriveds and
//! reactions, coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell is read inside a
//! derived or reaction body, that body is registered as an observer. When
//! the cell's value changes, its observers are queued for the next flush.
//!
//! ## Deriveds
//!
//! A Derived is a cached projection over other nodes. It recomputes lazily,
//! and only when a dependency's version actually moved.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting computation that re-runs whenever its
//! dependencies change. Reactions push reactive state into the outside
//! world, such as native view properties.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: each runtime keeps an explicit stack of
//! running computations, and every read registers the top of that stack.
//! Writes never run bodies directly; they mark nodes stale and the runtime
//! flushes them in priority order once the outermost batch closes.

mod cell;
mod context;
mod derived;
mod reaction;
mod runtime;

pub use cell::Cell;
pub use derived::Derived;
pub use reaction::Reaction;
pub use runtime::{ErrorHandler, Runtime};

/// Equality policy deciding whether a new value counts as a change.
pub(crate) type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;
