//! Debug and observability hook.
//!
//! A runtime can carry one listener that receives a [`NodeEvent`] whenever a
//! node is created, disposed, recomputed or notified. Events are delivered
//! synchronously on the thread that caused them, never while the graph is
//! locked, so a listener may read reactive values.

use std::sync::Arc;

use serde::Serialize;

use crate::graph::{NodeId, NodeKind};

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    Created,
    Disposed,
    /// A derived recomputed or a reaction re-ran.
    Recomputed,
    /// The node was marked stale by a write upstream. Deriveds that no
    /// reaction reads stay lazy and are not queued.
    Notified,
}

/// One entry of the in-memory event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeEvent {
    pub kind: NodeKind,
    pub node: NodeId,
    pub event: NodeEventKind,
    /// The node's local version when the event fired.
    pub version: u64,
}

/// Listener installed with [`Runtime::set_event_listener`](crate::Runtime::set_event_listener).
pub type EventListener = Arc<dyn Fn(&NodeEvent) + Send + Sync>;
