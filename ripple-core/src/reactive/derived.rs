//! Derived Implementation
//!
//! A Derived is a cached projection over cells and other deriveds. It
//! re-evaluates only when one of its dependencies changed.
//!
//! # How Deriveds Work
//!
//! 1. On first access, the derived runs its body inside a tracking scope
//!    and caches the result together with the version of every dependency
//!    it read.
//!
//! 2. When a cell it reads changes, the derived is marked `Dirty` and
//!    everything downstream `MaybeDirty`. Nothing recomputes yet.
//!
//! 3. On the next read (or during a flush, if a reaction depends on it),
//!    a `Dirty` derived recomputes. A `MaybeDirty` one first settles its
//!    own derived dependencies and recomputes only if a recorded version
//!    advanced.
//!
//! 4. The derived's own version advances only when the new value differs
//!    under its equality policy, so unchanged results stop propagation.
//!
//! # Errors
//!
//! A body that fails (returns an error or panics) leaves the derived dirty
//! and the previous value cached. Reads return the stored error without
//! re-running the body until something is written, and readers stay
//! subscribed so they recover with it.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BoxError, ReactiveError};
use crate::graph::{Computation, NodeId, NodeKind, NodeState};

use super::runtime::Runtime;
use super::Equality;

type Compute<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;

struct DerivedInner<T> {
    compute: Compute<T>,
    value: RwLock<Option<T>>,
    equals: Equality<T>,
}

impl<T> Computation for DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run(&self) -> Result<bool, BoxError> {
        let next = (self.compute)()?;

        let mut slot = self.value.write();
        let changed = match slot.as_ref() {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *slot = Some(next);
        }
        Ok(changed)
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Cell, Derived, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 2);
/// let doubled = Derived::new(&rt, {
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    runtime: Runtime,
    id: NodeId,
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a derived value. The body runs on first access, not here.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(runtime, Box::new(move || Ok(compute())), Box::new(|a: &T, b: &T| a == b))
    }

    /// Create a derived value from a fallible body.
    ///
    /// Errors surface from [`get`](Self::get). Engine errors returned by the
    /// body (such as a [`ReactiveError::CyclicDependency`] from a nested
    /// read) pass through unchanged.
    pub fn try_new<F, E>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(
            runtime,
            Box::new(move || compute().map_err(Into::into)),
            Box::new(|a: &T, b: &T| a == b),
        )
    }
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived value with a custom equality policy.
    pub fn with_equals<F, Q>(runtime: &Runtime, compute: F, equals: Q) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        Q: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::build(runtime, Box::new(move || Ok(compute())), Box::new(equals))
    }

    fn build(runtime: &Runtime, compute: Compute<T>, equals: Equality<T>) -> Self {
        let _serial = runtime.serialize();
        let inner = Arc::new(DerivedInner {
            compute,
            value: RwLock::new(None),
            equals,
        });
        let id = runtime.create_node(NodeKind::Derived, Some(inner.clone() as Arc<dyn Computation>));

        Self {
            runtime: runtime.clone(),
            id,
            inner,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside another derived or reaction body, this also registers that
    /// body as a dependent.
    pub fn get(&self) -> Result<T, ReactiveError> {
        let _serial = self.runtime.serialize();
        let settled = self.runtime.settle(self.id);

        // A reader of a failing derived still depends on it, so it re-runs
        // once the failure is fixed. A cycle gets no edge.
        if !matches!(settled, Err(ReactiveError::CyclicDependency { .. })) {
            self.runtime.observe(self.id, NodeKind::Derived)?;
        }
        settled?;
        self.cached()
    }

    /// Alias for [`get`](Self::get), for bindings that read a value property.
    pub fn value(&self) -> Result<T, ReactiveError> {
        self.get()
    }

    /// Get the current value, recomputing if necessary, without
    /// registering a dependency.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        self.runtime.untracked(|| self.get())
    }

    fn cached(&self) -> Result<T, ReactiveError> {
        // Only a derived disposed before it was ever read has no value.
        self.inner
            .value
            .read()
            .clone()
            .ok_or(ReactiveError::DisposedNodeAccess {
                node: self.id,
                kind: NodeKind::Derived,
            })
    }

    /// The derived's local version. Advances only when its value changes.
    pub fn version(&self) -> u64 {
        self.runtime.version(self.id).unwrap_or(0)
    }

    /// Current staleness, or `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        self.runtime.node_state(self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.state().is_some_and(|state| state != NodeState::Clean)
    }

    /// Check if the derived has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Number of recomputations so far.
    pub fn run_count(&self) -> usize {
        self.runtime.run_count(self.id)
    }

    pub fn dependency_count(&self) -> usize {
        self.runtime.dependency_count(self.id)
    }

    pub fn observer_count(&self) -> usize {
        self.runtime.observer_count(self.id)
    }

    /// Remove the derived from the graph and run its cleanups.
    pub fn dispose(&self) {
        self.runtime.dispose_node(self.id);
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.contains(self.id)
    }
}

impl<T> Clone for Derived<T>
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

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("version", &self.version())
            .field("has_value", &self.has_value())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
