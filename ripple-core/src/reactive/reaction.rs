//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that re-runs whenever one of
//! its dependencies changes.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction runs its body immediately to establish its
//!    dependencies (unless it was created deferred).
//!
//! 2. When a dependency changes, the reaction is queued. It re-runs during
//!    the next flush, after every derived it may read has settled.
//!
//! 3. Before re-running, the reaction runs the cleanups registered by its
//!    previous run and forgets its old dependencies; the new run tracks a
//!    fresh set.
//!
//! # Differences from Derived
//!
//! - Deriveds return a value; reactions do not.
//! - Deriveds are lazy (compute on access); reactions are eager.
//! - A failing derived returns its error to readers; a failing reaction is
//!   reported to the runtime's error handler and the flush carries on.
//!
//! # Cleanup
//!
//! A body may call [`Runtime::on_cleanup`] to register callbacks, or return
//! one from a [`Reaction::with_cleanup`] body. They run before the next
//! re-run and when the reaction is disposed, which is where bindings release
//! listeners, timers or native handles.
//!
//! # Lifetime
//!
//! The graph holds the body strongly. Dropping every handle does not stop a
//! reaction; call [`Reaction::dispose`].

use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::graph::{Computation, NodeId, NodeKind};

use super::runtime::Runtime;

type Body = Box<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

struct ReactionInner {
    body: Body,
}

impl Computation for ReactionInner {
    fn run(&self) -> Result<bool, BoxError> {
        (self.body)()?;
        Ok(true)
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Cell, Reaction, Runtime};
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let reaction = Reaction::new(&rt, {
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.store(count.get(), Ordering::SeqCst)
/// });
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// reaction.dispose();
/// ```
#[derive(Clone)]
pub struct Reaction {
    runtime: Runtime,
    id: NodeId,
}

impl Reaction {
    /// Create a reaction and run it once to establish dependencies.
    pub fn new<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(runtime, Self::infallible(body), true)
    }

    /// Create a reaction from a fallible body and run it once.
    ///
    /// Errors from the first run and from every scheduled re-run go to the
    /// runtime's error handler.
    pub fn try_new<F, E>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(runtime, Box::new(move || body().map_err(Into::into)), true)
    }

    /// Create a reaction whose body returns its own cleanup.
    ///
    /// The returned closure runs before the next re-run and on disposal,
    /// exactly like one registered with [`Runtime::on_cleanup`].
    pub fn with_cleanup<F, C>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let weak = runtime.downgrade();
        Self::build(
            runtime,
            Box::new(move || {
                let cleanup = body();
                match weak.upgrade() {
                    Some(runtime) => runtime.on_cleanup(cleanup),
                    None => cleanup(),
                }
                Ok(())
            }),
            true,
        )
    }

    /// Create a reaction without running it.
    ///
    /// It tracks nothing and never re-runs until [`start`](Self::start).
    pub fn new_deferred<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(runtime, Self::infallible(body), false)
    }

    fn infallible<F>(body: F) -> Body
    where
        F: Fn() + Send + Sync + 'static,
    {
        Box::new(move || {
            body();
            Ok(())
        })
    }

    fn build(runtime: &Runtime, body: Body, autostart: bool) -> Self {
        let _serial = runtime.serialize();
        let inner: Arc<dyn Computation> = Arc::new(ReactionInner { body });
        let id = runtime.create_node(NodeKind::Reaction, Some(inner));

        let reaction = Self {
            runtime: runtime.clone(),
            id,
        };

        if autostart {
            // Writes made by the first run are flushed after it returns.
            if let Err(error) = runtime.batch(|| runtime.run_node(id)) {
                runtime.report(error);
            }
        } else {
            runtime.deactivate(id);
        }
        reaction
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run a deferred reaction for the first time.
    ///
    /// Does nothing if it is already running or was disposed.
    pub fn start(&self) {
        let _serial = self.runtime.serialize();
        if let Err(error) = self.runtime.batch(|| self.runtime.activate(self.id)) {
            self.runtime.report(error);
        }
    }

    /// Stop the reaction for good.
    ///
    /// Runs pending cleanups and removes the reaction from the observer set
    /// of every dependency. A queued re-run is dropped, even mid-flush.
    pub fn dispose(&self) {
        self.runtime.dispose_node(self.id);
    }

    pub fn is_active(&self) -> bool {
        self.runtime.is_active(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.contains(self.id)
    }

    /// Get the number of times the reaction has run.
    pub fn run_count(&self) -> usize {
        self.runtime.run_count(self.id)
    }

    /// Get the number of dependencies read by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.dependency_count(self.id)
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::{Cell, Derived};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn reaction_runs_on_creation() {
        let rt = Runtime::new();
        let runs = counter();

        let reaction = Reaction::new(&rt, {
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(reaction.run_count(), 1);
        assert!(reaction.is_active());
    }

    #[test]
    fn deferred_reaction_waits_for_start() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let runs = counter();

        let reaction = Reaction::new_deferred(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(reaction.run_count(), 0);
        assert!(!reaction.is_active());
        cell.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        reaction.start();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Starting twice is a no-op.
        reaction.start();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reaction_reruns_when_dependency_changes() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reaction = Reaction::new(&rt, {
            let (cell, seen) = (cell.clone(), seen.clone());
            move || seen.lock().push(cell.get())
        });

        cell.set(1);
        cell.set(2);

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(reaction.dependency_count(), 1);
    }

    #[test]
    fn reaction_does_not_run_after_disposal() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let runs = counter();

        let reaction = Reaction::new(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        reaction.dispose();
        assert!(reaction.is_disposed());
        assert_eq!(cell.observer_count(), 0);

        cell.set(1);
        cell.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let reaction = Reaction::new(&rt, {
            let (rt, cell, log) = (rt.clone(), cell.clone(), log.clone());
            move || {
                let value = cell.get();
                log.lock().push(format!("run {value}"));
                let log = log.clone();
                rt.on_cleanup(move || log.lock().push(format!("cleanup {value}")));
            }
        });

        cell.set(1);
        reaction.dispose();

        assert_eq!(*log.lock(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn returned_cleanup_runs_before_rerun_and_on_dispose() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let reaction = Reaction::with_cleanup(&rt, {
            let (cell, log) = (cell.clone(), log.clone());
            move || {
                let value = cell.get();
                log.lock().push(format!("run {value}"));
                let log = log.clone();
                move || log.lock().push(format!("cleanup {value}"))
            }
        });

        cell.set(1);
        assert_eq!(reaction.run_count(), 2);
        reaction.dispose();

        assert_eq!(*log.lock(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn reaction_can_dispose_itself() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let slot: Arc<Mutex<Option<Reaction>>> = Arc::new(Mutex::new(None));
        let runs = counter();

        let reaction = Reaction::new(&rt, {
            let (cell, slot, runs) = (cell.clone(), slot.clone(), runs.clone());
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if cell.get() > 0 {
                    let me = slot.lock().take();
                    if let Some(me) = me {
                        me.dispose();
                    }
                }
            }
        });
        *slot.lock() = Some(reaction.clone());

        cell.set(1);
        cell.set(2);

        assert!(reaction.is_disposed());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_reaction_does_not_stop_siblings() {
        let rt = Runtime::new();
        let errors = counter();
        rt.set_error_handler({
            let errors = errors.clone();
            move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        let cell = Cell::new(&rt, 0);
        let _broken = Reaction::try_new(&rt, {
            let cell = cell.clone();
            move || if cell.get() == 1 { Err("cannot handle 1") } else { Ok(()) }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _healthy = Reaction::new(&rt, {
            let (cell, seen) = (cell.clone(), seen.clone());
            move || seen.lock().push(cell.get())
        });

        cell.set(1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![0, 1]);

        // The broken reaction kept its dependency and recovers.
        cell.set(2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_reaction_is_isolated() {
        let rt = Runtime::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        rt.set_error_handler({
            let errors = errors.clone();
            move |error: &ReactiveError| errors.lock().push(error.to_string())
        });

        let cell = Cell::new(&rt, 0);
        let _panicky = Reaction::new(&rt, {
            let cell = cell.clone();
            move || assert!(cell.get() < 3, "too large")
        });

        cell.set(5);

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("too large"));
        assert!(!rt.is_tracking());
    }

    #[test]
    fn reaction_skips_when_derived_value_is_unchanged() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 2);
        let parity = Derived::new(&rt, {
            let cell = cell.clone();
            move || cell.get() % 2
        });
        let runs = counter();

        let _reaction = Reaction::try_new(&rt, {
            let (parity, runs) = (parity.clone(), runs.clone());
            move || {
                parity.get()?;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ReactiveError>(())
            }
        });

        cell.set(4);
        cell.set(6);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(7);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writes_from_reactions_are_flushed_in_later_passes() {
        let rt = Runtime::new();
        let source = Cell::new(&rt, 1);
        let mirror = Cell::new(&rt, 0);

        let _copy = Reaction::new(&rt, {
            let (source, mirror) = (source.clone(), mirror.clone());
            move || mirror.set(source.get() * 10)
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _watch = Reaction::new(&rt, {
            let (mirror, seen) = (mirror.clone(), seen.clone());
            move || seen.lock().push(mirror.get())
        });

        source.set(2);
        source.set(3);

        assert_eq!(*seen.lock(), vec![10, 20, 30]);
    }

    #[test]
    fn runaway_flush_is_abandoned() {
        let rt = Runtime::with_config(crate::RuntimeConfig::default().max_flush_passes(5));
        let errors = Arc::new(Mutex::new(Vec::new()));
        rt.set_error_handler({
            let errors = errors.clone();
            move |error: &ReactiveError| errors.lock().push(error.to_string())
        });

        let cell = Cell::new(&rt, 0);
        let _ping = Reaction::new(&rt, {
            let cell = cell.clone();
            move || cell.set(cell.get() + 1)
        });

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("5 passes"));
        assert_eq!(rt.pending_count(), 0);
    }
}
