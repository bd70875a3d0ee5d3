//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive: mutable storage that knows
//! who reads it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read inside a derived or reaction body, that body is
//!    registered as an observer, together with the cell's current version.
//!
//! 2. When a write is accepted by the cell's equality policy, the cell's
//!    version and the global clock advance and every observer is queued.
//!
//! 3. Queued observers run on the next flush, never inside `set` itself.
//!    Outside a batch that flush happens as `set` returns.
//!
//! # Memory Layout
//!
//! The value lives in the handle (shared between clones); the graph only
//! stores the cell's version and observer set.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

use super::runtime::Runtime;
use super::Equality;

struct CellInner<T> {
    value: RwLock<T>,
    equals: Equality<T>,
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Cell, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
///
/// count.set(5);
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    runtime: Runtime,
    id: NodeId,
    inner: Arc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a cell that skips writes equal to the current value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::with_equals(runtime, value, |current, next| current == next)
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cell with a custom equality policy.
    ///
    /// A write for which `equals(current, new)` holds is dropped without
    /// notifying anyone.
    pub fn with_equals<F>(runtime: &Runtime, value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let _serial = runtime.serialize();
        let id = runtime.create_node(NodeKind::Cell, None);

        Self {
            runtime: runtime.clone(),
            id,
            inner: Arc::new(CellInner {
                value: RwLock::new(value),
                equals: Box::new(equals),
            }),
        }
    }

    /// Create a cell that notifies on every write.
    pub fn always_notify(runtime: &Runtime, value: T) -> Self {
        Self::with_equals(runtime, value, |_, _| false)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the current value, registering the running computation as an
    /// observer.
    ///
    /// # Panics
    ///
    /// Panics on a disposed cell when the runtime uses strict disposal.
    /// Use [`try_get`](Self::try_get) to handle that case.
    pub fn get(&self) -> T {
        self.try_get().unwrap_or_else(|error| panic!("{error}"))
    }

    /// Get the current value, failing on a disposed cell in strict mode.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let _serial = self.runtime.serialize();
        self.runtime.observe(self.id, NodeKind::Cell)?;
        Ok(self.inner.value.read().clone())
    }

    /// Alias for [`get`](Self::get), for bindings that read a value property.
    pub fn value(&self) -> T {
        self.get()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify observers.
    ///
    /// # Panics
    ///
    /// Panics on a disposed cell when the runtime uses strict disposal.
    pub fn set(&self, value: T) {
        self.try_set(value).unwrap_or_else(|error| panic!("{error}"))
    }

    /// Set a new value, failing on a disposed cell in strict mode.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        let _serial = self.runtime.serialize();

        if !self.runtime.contains(self.id) {
            if let Some(error) = self.runtime.disposed_error(self.id, NodeKind::Cell) {
                return Err(error);
            }
            warn!(cell = self.id.raw(), "write to a disposed cell; nobody will be notified");
            *self.inner.value.write() = value;
            return Ok(());
        }

        {
            let mut current = self.inner.value.write();
            if (self.inner.equals)(&*current, &value) {
                trace!(cell = self.id.raw(), "write skipped, value unchanged");
                return Ok(());
            }
            *current = value;
        }

        self.runtime.cell_changed(self.id);
        Ok(())
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let _serial = self.runtime.serialize();
        let next = {
            let guard = self.inner.value.read();
            f(&*guard)
        };
        self.set(next);
    }

    /// The cell's local version. Advances on every accepted write.
    pub fn version(&self) -> u64 {
        self.runtime.version(self.id).unwrap_or(0)
    }

    /// Number of computations that read this cell in their latest run.
    pub fn observer_count(&self) -> usize {
        self.runtime.observer_count(self.id)
    }

    /// Remove the cell from the graph.
    ///
    /// Observers forget the edge; later writes notify nobody.
    pub fn dispose(&self) {
        self.runtime.dispose_node(self.id);
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.contains(self.id)
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("version", &self.version())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
