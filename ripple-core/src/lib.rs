//! Ripple Core
//!
//! This crate provides the reactive engine behind the Ripple UI framework:
//! dependency tracking and incremental recomputation that drive
//! fine-grained view updates without diffing a virtual tree.
//!
//! It implements:
//!
//! - Reactive primitives: cells, cached derived values and reactions
//! - A dynamic dependency graph with versioned staleness checks
//! - Batching and a flush scheduler that settles deriveds before reactions
//!
//! Native view bridging, layout and component lifecycles live outside this
//! crate and consume it only through the handles below.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: cells, deriveds, reactions and the runtime that owns them
//! - `graph`: the node arena, edge sets, version clock and pending queues
//! - `events`: an optional in-memory event stream for tooling
//! - `config` / `error`: runtime options and error types
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{Cell, Derived, Reaction, Runtime};
//! use std::sync::{Arc, Mutex};
//!
//! let rt = Runtime::new();
//! let count = Cell::new(&rt, 0);
//!
//! // Create a derived value
//! let doubled = Derived::new(&rt, {
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create a reaction
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let reaction = Reaction::new(&rt, {
//!     let seen = seen.clone();
//!     move || seen.lock().unwrap().push(doubled.get().unwrap())
//! });
//!
//! // Several writes, one flush
//! rt.batch(|| {
//!     count.set(4);
//!     count.set(5);
//! });
//! assert_eq!(*seen.lock().unwrap(), vec![0, 10]);
//!
//! reaction.dispose();
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, ReactiveError};
pub use events::{EventListener, NodeEvent, NodeEventKind};
pub use graph::{NodeId, NodeKind, NodeState, VersionClock};
pub use reactive::{Cell, Derived, ErrorHandler, Reaction, Runtime};
