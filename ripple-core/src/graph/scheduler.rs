//! Update Scheduler
//!
//! The scheduler holds the nodes waiting for the next flush and the batching
//! state that decides when that flush happens.
//!
//! # Ordering
//!
//! Pending nodes live in two insertion-ordered sets, one per priority:
//! deriveds (priority 0) and reactions (priority 1). A flush pass takes a
//! snapshot of both and settles every derived before running any reaction,
//! so reactions always read values computed from the latest writes.
//!
//! Because a reaction may write cells while it runs, the pending sets can
//! refill during a pass. The flush loop keeps taking passes until one comes
//! back empty.

use indexmap::IndexSet;

use super::node::{NodeId, NodeKind};

/// Number of flush priorities: deriveds, then reactions.
const PRIORITIES: usize = 2;

/// A snapshot of pending work, taken at the start of one flush pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Pass {
    pub deriveds: Vec<NodeId>,
    pub reactions: Vec<NodeId>,
}

/// Pending queues and batching state for one runtime.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    /// One queue per [`NodeKind::priority`].
    pending: [IndexSet<NodeId>; PRIORITIES],
    batch_depth: usize,
    flushing: bool,
}

impl Scheduler {
    /// Queue a node for the next flush.
    ///
    /// Returns `false` if it was already pending or can't be scheduled.
    pub fn enqueue(&mut self, id: NodeId, kind: NodeKind) -> bool {
        match kind.priority() {
            Some(priority) => self.pending[priority].insert(id),
            None => false,
        }
    }

    /// Forget a node, e.g. because it was disposed.
    pub fn remove(&mut self, id: NodeId) {
        for queue in &mut self.pending {
            queue.shift_remove(&id);
        }
    }

    /// Take everything pending, leaving the queues empty.
    pub fn take_pass(&mut self) -> Option<Pass> {
        if self.pending_count() == 0 {
            return None;
        }

        let [deriveds, reactions] = std::mem::take(&mut self.pending);
        Some(Pass {
            deriveds: deriveds.into_iter().collect(),
            reactions: reactions.into_iter().collect(),
        })
    }

    pub fn clear(&mut self) {
        for queue in &mut self.pending {
            queue.clear();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(IndexSet::len).sum()
    }

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close one batch level. Returns `true` when the outermost batch closed.
    pub fn end_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    pub fn batch_depth(&self) -> usize {
        self.batch_depth
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }
}
