//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, deriveds and
//! reactions. It owns the dependency graph, the version clock, the pending
//! queues and the tracking stack of one independent reactive graph.
//!
//! # How It Works
//!
//! Updates follow a strict two-phase protocol:
//!
//! 1. **Notify.** A write to a cell bumps its version and the global clock,
//!    then marks everything downstream stale and enqueues the reactions it
//!    reaches (plus the deriveds on the way). No body runs in this phase.
//!
//! 2. **Flush.** When the outermost batch closes, the runtime takes the
//!    pending set in passes: deriveds settle first, then reactions re-run.
//!    Reactions may write cells, which refills the pending set, so passes
//!    repeat until one comes back empty.
//!
//! Deriveds are otherwise pull-based: a read recomputes only if the node is
//! dirty or a version check shows that a dependency advanced.
//!
//! # Thread Safety
//!
//! The graph sits behind a short-lived mutex that is never held while user
//! code runs. By default the runtime assumes a single owner thread; with
//! [`RuntimeConfig::thread_safe`] every public operation additionally holds
//! a reentrant lock, so whole operations from different threads serialize.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::events::{EventListener, NodeEvent, NodeEventKind};
use crate::graph::{Computation, Graph, NodeId, NodeKind, NodeState, Scheduler};

use super::context::{TrackingScope, TrackingStack};

/// Handler installed with [`Runtime::set_error_handler`].
pub type ErrorHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

/// Mutable graph state, guarded by the runtime's mutex.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub graph: Graph,
    pub scheduler: Scheduler,
    pub tracking: TrackingStack,
}

struct RuntimeInner {
    config: RuntimeConfig,
    state: Mutex<State>,
    serial: ReentrantMutex<()>,
    error_handler: RwLock<ErrorHandler>,
    listener: RwLock<Option<EventListener>>,
}

/// Owner of one reactive graph.
///
/// Cloning a runtime yields another handle to the same graph.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Cell, Derived, Reaction, Runtime};
/// use std::sync::Arc;
/// use parking_lot::Mutex;
///
/// let rt = Runtime::new();
/// let a = Cell::new(&rt, 1);
/// let b = Cell::new(&rt, 2);
///
/// let sum = Derived::new(&rt, {
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + b.get()
/// });
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let _reaction = Reaction::try_new(&rt, {
///     let log = log.clone();
///     move || {
///         log.lock().push(sum.get()?);
///         Ok::<_, ripple_core::ReactiveError>(())
///     }
/// });
///
/// a.set(10);
/// assert_eq!(*log.lock(), vec![3, 12]);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let default_handler: ErrorHandler = Arc::new(|error: &ReactiveError| {
            tracing::error!(%error, "reactive node failed");
        });

        Self {
            inner: Arc::new(RuntimeInner {
                config,
                state: Mutex::new(State::default()),
                serial: ReentrantMutex::new(()),
                error_handler: RwLock::new(default_handler),
                listener: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles point at the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the graph alive, for bodies the graph owns.
    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    /// Hold the operation lock when running in thread-safe mode.
    pub(crate) fn serialize(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.inner.config.thread_safe.then(|| self.inner.serial.lock())
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Replace the handler that receives failures from scheduled nodes.
    ///
    /// The default handler logs through `tracing::error!`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ReactiveError) + Send + Sync + 'static,
    {
        *self.inner.error_handler.write() = Arc::new(handler);
    }

    /// Install a listener for node lifecycle events.
    pub fn set_event_listener<F>(&self, listener: F)
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        *self.inner.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_event_listener(&self) {
        *self.inner.listener.write() = None;
    }

    pub(crate) fn report(&self, error: ReactiveError) {
        let handler = self.inner.error_handler.read().clone();
        handler(&error);
    }

    fn emit(&self, kind: NodeKind, node: NodeId, event: NodeEventKind, version: u64) {
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener(&NodeEvent { kind, node, event, version });
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// The current value of the global version clock.
    pub fn global_version(&self) -> u64 {
        self.state().graph.clock().now()
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.state().graph.len()
    }

    /// Number of nodes waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.state().scheduler.pending_count()
    }

    pub fn is_batching(&self) -> bool {
        self.state().scheduler.is_batching()
    }

    /// Whether a read right now would register a dependency.
    pub fn is_tracking(&self) -> bool {
        self.state().tracking.current().is_some()
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn create_node(
        &self,
        kind: NodeKind,
        computation: Option<Arc<dyn Computation>>,
    ) -> NodeId {
        let id = self.state().graph.add_node(kind, computation);
        trace!(node = id.raw(), %kind, "node created");
        self.emit(kind, id, NodeEventKind::Created, 0);
        id
    }

    /// Remove a node from the graph and run its cleanups.
    ///
    /// Returns `false` if it was already gone.
    pub(crate) fn dispose_node(&self, id: NodeId) -> bool {
        let _serial = self.serialize();

        let removed = {
            let mut state = self.state();
            state.scheduler.remove(id);
            state.graph.remove_node(id)
        };
        let Some(mut node) = removed else {
            return false;
        };
        node.set_active(false);

        for cleanup in node.take_cleanups() {
            cleanup();
        }

        let (kind, version) = (node.kind(), node.version());
        // Drop the body outside the graph lock; it may own other handles.
        drop(node);

        debug!(node = id.raw(), %kind, "node disposed");
        self.emit(kind, id, NodeEventKind::Disposed, version);
        true
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.state().graph.contains(id)
    }

    pub(crate) fn is_active(&self, id: NodeId) -> bool {
        self.state().graph.node(id).is_some_and(|node| node.is_active())
    }

    pub(crate) fn version(&self, id: NodeId) -> Option<u64> {
        self.state().graph.version(id)
    }

    pub(crate) fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.state().graph.node(id).map(|node| node.state())
    }

    pub(crate) fn run_count(&self, id: NodeId) -> usize {
        self.state().graph.node(id).map_or(0, |node| node.run_count())
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.state().graph.node(id).map_or(0, |node| node.dependencies().len())
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.state().graph.node(id).map_or(0, |node| node.observers().len())
    }

    pub(crate) fn disposed_error(&self, id: NodeId, kind: NodeKind) -> Option<ReactiveError> {
        self.inner
            .config
            .strict_disposal
            .then_some(ReactiveError::DisposedNodeAccess { node: id, kind })
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Register a read of `id` with the current observer, if there is one.
    pub(crate) fn observe(&self, id: NodeId, kind: NodeKind) -> Result<(), ReactiveError> {
        let mut state = self.state();
        if !state.graph.contains(id) {
            drop(state);
            return match self.disposed_error(id, kind) {
                Some(error) => Err(error),
                None => Ok(()),
            };
        }

        if let Some(observer) = state.tracking.current() {
            if observer != id {
                state.graph.add_edge(id, observer);
                trace!(dependency = id.raw(), observer = observer.raw(), "dependency tracked");
            }
        }
        Ok(())
    }

    /// Run `f` without registering any dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.serialize();
        let _scope = TrackingScope::untracked(self);
        f()
    }

    /// Register a callback to run before the current computation re-runs
    /// and when it is disposed.
    ///
    /// Outside of any derived or reaction body there is no owner, so the
    /// callback runs immediately.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _serial = self.serialize();

        let mut state = self.state();
        let owner = state.tracking.owner();
        if let Some(node) = owner.and_then(|id| state.graph.node_mut(id)) {
            node.push_cleanup(Box::new(cleanup));
            return;
        }
        drop(state);

        if owner.is_none() {
            warn!("on_cleanup called outside of a reaction; running it now");
        }
        cleanup();
    }

    // ------------------------------------------------------------------
    // Phase 1: notify
    // ------------------------------------------------------------------

    /// Accept a write to cell `id` and notify everything downstream.
    ///
    /// Outside a batch the write acts as a batch of one and flushes on exit.
    pub(crate) fn cell_changed(&self, id: NodeId) {
        let _serial = self.serialize();

        let (version, reached, flush_now) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(version) = state.graph.record_write(id) else {
                return;
            };

            let reached = state.graph.mark_changed(id);
            for &derived in &reached.deriveds {
                state.scheduler.enqueue(derived, NodeKind::Derived);
            }
            for &reaction in &reached.reactions {
                state.scheduler.enqueue(reaction, NodeKind::Reaction);
            }

            let notified: SmallVec<[(NodeKind, NodeId, u64); 8]> = reached
                .marked
                .iter()
                .map(|&(kind, node)| (kind, node, state.graph.version(node).unwrap_or(0)))
                .collect();

            let flush_now = !state.scheduler.is_batching() && !state.scheduler.is_flushing();
            (version, notified, flush_now)
        };

        trace!(cell = id.raw(), version, notified = reached.len(), "cell changed");
        for (kind, node, node_version) in reached {
            self.emit(kind, node, NodeEventKind::Notified, node_version);
        }

        if flush_now {
            self.flush();
        }
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` with notifications collected instead of flushed.
    ///
    /// Only the outermost batch flushes, exactly once, when it exits.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.serialize();

        let result = {
            let _scope = BatchScope::enter(self);
            f()
        };

        if !self.is_batching() {
            self.flush();
        }
        result
    }

    // ------------------------------------------------------------------
    // Phase 2: flush
    // ------------------------------------------------------------------

    /// Process pending nodes until the graph is stable.
    ///
    /// Calls made while a flush is already running return immediately; the
    /// running flush picks up whatever they would have processed.
    pub fn flush(&self) {
        let _serial = self.serialize();

        {
            let mut state = self.state();
            if state.scheduler.is_flushing() {
                return;
            }
            state.scheduler.set_flushing(true);
        }
        let _flushing = FlushScope { runtime: self };

        let limit = self.inner.config.max_flush_passes;
        let mut passes = 0;

        loop {
            let pass = self.state().scheduler.take_pass();
            let Some(pass) = pass else {
                break;
            };

            if passes == limit {
                self.state().scheduler.clear();
                self.report(ReactiveError::FlushLimitExceeded { passes });
                break;
            }
            passes += 1;

            debug!(
                pass = passes,
                deriveds = pass.deriveds.len(),
                reactions = pass.reactions.len(),
                "flush pass"
            );

            // A failing derived is reported by the reaction that reads it.
            for id in pass.deriveds {
                if !self.contains(id) {
                    continue;
                }
                if let Err(error) = self.settle(id) {
                    debug!(node = id.raw(), %error, "derived failed during flush");
                }
            }

            for id in pass.reactions {
                if !self.should_rerun(id) {
                    continue;
                }
                if let Err(error) = self.run_node(id) {
                    self.report(error);
                }
            }
        }
    }

    /// Decide, right before execution, whether a dequeued reaction runs.
    fn should_rerun(&self, id: NodeId) -> bool {
        let dependencies = {
            let state = self.state();
            let Some(node) = state.graph.node(id) else {
                return false;
            };
            if !node.is_active() {
                return false;
            }
            match node.state() {
                NodeState::Clean => return false,
                NodeState::Dirty => return true,
                NodeState::MaybeDirty => snapshot(node.dependencies()),
            }
        };

        // A failing derived dependency counts as changed; the reaction will
        // see the error itself when it reads it.
        let changed = self.dependencies_changed(&dependencies).unwrap_or(true);
        if !changed {
            self.mark_clean(id);
            trace!(node = id.raw(), "reaction skipped, dependencies unchanged");
        }
        changed
    }

    // ------------------------------------------------------------------
    // Recomputation
    // ------------------------------------------------------------------

    /// Bring derived `id` up to date, recomputing only if needed.
    pub(crate) fn settle(&self, id: NodeId) -> Result<(), ReactiveError> {
        let dependencies = {
            let state = self.state();
            if state.tracking.contains(id) {
                return Err(ReactiveError::CyclicDependency { node: id });
            }

            let Some(node) = state.graph.node(id) else {
                drop(state);
                return match self.disposed_error(id, NodeKind::Derived) {
                    Some(error) => Err(error),
                    None => Ok(()),
                };
            };

            match node.state() {
                NodeState::Clean if node.global_version_seen() == state.graph.clock().now() => {
                    return Ok(());
                }
                NodeState::Dirty => {
                    // Nothing was written since the last failure.
                    if let Some(error) = node.failure_at(state.graph.clock().now()) {
                        return Err(error.clone());
                    }
                    None
                }
                NodeState::Clean | NodeState::MaybeDirty => Some(snapshot(node.dependencies())),
            }
        };

        if let Some(dependencies) = dependencies {
            if !self.dependencies_changed(&dependencies)? {
                self.mark_clean(id);
                return Ok(());
            }
        }

        self.run_node(id)
    }

    /// Settle derived dependencies in order and compare versions.
    fn dependencies_changed(&self, dependencies: &[(NodeId, u64)]) -> Result<bool, ReactiveError> {
        for &(dependency, seen) in dependencies {
            let kind = self.state().graph.kind(dependency);
            if kind == Some(NodeKind::Derived) {
                self.settle(dependency)?;
            }

            match self.version(dependency) {
                Some(current) if current == seen => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    fn mark_clean(&self, id: NodeId) {
        let mut state = self.state();
        let now = state.graph.clock().now();
        if let Some(node) = state.graph.node_mut(id) {
            node.mark_clean(now);
        }
    }

    /// Run the body of derived or reaction `id` inside a fresh tracking scope.
    pub(crate) fn run_node(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (kind, computation, cleanups) = {
            let mut state = self.state();
            let Some(node) = state.graph.node_mut(id) else {
                return Ok(());
            };
            if !node.is_active() {
                return Ok(());
            }
            let Some(computation) = node.computation() else {
                return Ok(());
            };
            let kind = node.kind();
            let cleanups = node.take_cleanups();
            // Clean before the body runs, so a write to one of its own
            // dependencies during the run leaves it stale again.
            node.set_state(NodeState::Clean);

            state.graph.clear_dependencies(id);
            (kind, computation, cleanups)
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            for cleanup in cleanups {
                cleanup();
            }
            let _scope = TrackingScope::enter(self, id);
            computation.run()
        }));

        let outcome = match outcome {
            Ok(Ok(changed)) => Ok(changed),
            Ok(Err(error)) => Err(ReactiveError::from_body(id, kind, error)),
            Err(payload) => Err(ReactiveError::from_panic(id, kind, payload)),
        };

        let version = {
            let mut state = self.state();
            let now = state.graph.clock().now();
            let Some(node) = state.graph.node_mut(id) else {
                // Disposed while running.
                return outcome.map(|_| ());
            };
            node.record_run();

            match &outcome {
                Ok(changed) => {
                    if *changed && kind == NodeKind::Derived {
                        node.bump_version();
                    }
                    node.clear_failure();
                    if node.state() == NodeState::Clean {
                        node.mark_clean(now);
                    }
                }
                // A broken derived stays dirty; readers get the stored error
                // until something is written.
                Err(error) if kind == NodeKind::Derived => node.record_failure(now, error.clone()),
                // A broken reaction keeps what it read before failing.
                Err(_) => {}
            }
            node.version()
        };

        match &outcome {
            Ok(_) => debug!(node = id.raw(), %kind, version, "recomputed"),
            Err(error) => debug!(node = id.raw(), %kind, %error, "recomputation failed"),
        }
        self.emit(kind, id, NodeEventKind::Recomputed, version);

        outcome.map(|_| ())
    }

    /// Mark a deferred node active and run it for the first time.
    pub(crate) fn activate(&self, id: NodeId) -> Result<(), ReactiveError> {
        {
            let mut state = self.state();
            let Some(node) = state.graph.node_mut(id) else {
                return Ok(());
            };
            if node.is_active() {
                return Ok(());
            }
            node.set_active(true);
        }
        self.run_node(id)
    }

    pub(crate) fn deactivate(&self, id: NodeId) {
        if let Some(node) = self.state().graph.node_mut(id) {
            node.set_active(false);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("nodes", &state.graph.len())
            .field("global_version", &state.graph.clock().now())
            .field("pending", &state.scheduler.pending_count())
            .field("batch_depth", &state.scheduler.batch_depth())
            .finish()
    }
}

fn snapshot(dependencies: &indexmap::IndexMap<NodeId, u64>) -> SmallVec<[(NodeId, u64); 8]> {
    dependencies.iter().map(|(id, version)| (*id, *version)).collect()
}

/// Non-owning runtime handle.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Guard that closes one batch level when dropped.
struct BatchScope<'a> {
    runtime: &'a Runtime,
}

impl<'a> BatchScope<'a> {
    fn enter(runtime: &'a Runtime) -> Self {
        let depth = {
            let mut state = runtime.state();
            state.scheduler.begin_batch();
            state.scheduler.batch_depth()
        };
        trace!(depth, "batch opened");
        Self { runtime }
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.runtime.state().scheduler.end_batch() {
            trace!("outermost batch closed");
        }
    }
}

/// Guard that clears the flushing flag, even if a flush unwinds.
struct FlushScope<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushScope<'_> {
    fn drop(&mut self) {
        self.runtime.state().scheduler.set_flushing(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Cell, Derived, Reaction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runtimes_are_independent() {
        let first = Runtime::new();
        let second = Runtime::new();

        let a = Cell::new(&first, 0);
        let _b = Cell::new(&second, 0);
        a.set(1);

        assert_eq!(first.global_version(), 1);
        assert_eq!(second.global_version(), 0);
        assert!(!first.ptr_eq(&second));
        assert!(first.ptr_eq(&first.clone()));
    }

    #[test]
    fn batch_defers_flush_until_outermost_exit() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));

        let _reaction = Reaction::new(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        rt.batch(|| {
            rt.batch(|| cell.set(1));
            assert_eq!(rt.pending_count(), 1);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            cell.set(2);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(rt.pending_count(), 0);
        assert!(!rt.is_batching());
    }

    #[test]
    fn batch_returns_closure_result() {
        let rt = Runtime::new();
        assert_eq!(rt.batch(|| 7), 7);
    }

    #[test]
    fn error_handler_receives_reaction_failures() {
        let rt = Runtime::new();
        let failures = Arc::new(AtomicUsize::new(0));
        rt.set_error_handler({
            let failures = failures.clone();
            move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        });

        let _reaction = Reaction::try_new(&rt, || Err("always broken"));

        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_cleanup_outside_reaction_runs_immediately() {
        let rt = Runtime::new();
        let ran = Arc::new(AtomicUsize::new(0));

        rt.on_cleanup({
            let ran = ran.clone();
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn untracked_reads_register_nothing() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 1);

        let derived = Derived::new(&rt, {
            let (rt, cell) = (rt.clone(), cell.clone());
            move || rt.untracked(|| cell.get())
        });

        assert_eq!(derived.get().unwrap(), 1);
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn flush_without_pending_work_is_a_no_op() {
        let rt = Runtime::new();
        rt.flush();
        assert_eq!(rt.pending_count(), 0);
    }

    #[test]
    fn debug_output_summarizes_graph() {
        let rt = Runtime::new();
        let _cell = Cell::new(&rt, 0);

        let debug = format!("{rt:?}");
        assert!(debug.contains("nodes: 1"));
    }
}
