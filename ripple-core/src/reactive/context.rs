//! Tracking Context
//!
//! The tracking context records which computation is currently running, so
//! that reads can register it as an observer.
//!
//! # Implementation
//!
//! Each runtime owns an explicit stack. Entering a computation (running a
//! derived or reaction body) pushes its node id; the returned guard pops it
//! when dropped, even if the body panics. An `untracked` frame pushes
//! `None`, which hides the enclosing observer from reads.
//!
//! Because the stack belongs to the runtime instead of a thread-local,
//! independent graphs never see each other's observers.

use crate::graph::NodeId;

use super::runtime::Runtime;

/// The observer stack of one runtime.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: Vec<Option<NodeId>>,
}

impl TrackingStack {
    pub fn push(&mut self, observer: Option<NodeId>) {
        self.frames.push(observer);
    }

    pub fn pop(&mut self) -> Option<Option<NodeId>> {
        self.frames.pop()
    }

    /// The observer reads should register with, if any.
    pub fn current(&self) -> Option<NodeId> {
        self.frames.last().copied().flatten()
    }

    /// The innermost running computation, looking through untracked frames.
    pub fn owner(&self) -> Option<NodeId> {
        self.frames.iter().rev().find_map(|frame| *frame)
    }

    /// Whether `id` is running somewhere on the stack.
    pub fn contains(&self, id: NodeId) -> bool {
        self.frames.contains(&Some(id))
    }
}

/// Guard that pops the tracking frame when dropped.
pub(crate) struct TrackingScope<'a> {
    runtime: &'a Runtime,
    observer: Option<NodeId>,
}

impl<'a> TrackingScope<'a> {
    /// Enter a scope in which reads register `observer` as a dependent.
    pub fn enter(runtime: &'a Runtime, observer: NodeId) -> Self {
        Self::push(runtime, Some(observer))
    }

    /// Enter a scope in which reads register nothing.
    pub fn untracked(runtime: &'a Runtime) -> Self {
        Self::push(runtime, None)
    }

    fn push(runtime: &'a Runtime, observer: Option<NodeId>) -> Self {
        runtime.state().tracking.push(observer);
        Self { runtime, observer }
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let popped = self.runtime.state().tracking.pop();

        // Catches scopes that were dropped out of order.
        debug_assert_eq!(
            popped,
            Some(self.observer),
            "TrackingScope mismatch: expected {:?}, got {:?}",
            self.observer,
            popped
        );
    }
}
