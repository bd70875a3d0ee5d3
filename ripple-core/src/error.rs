//! Error types for the reactive engine.
//!
//! Reading a broken derived fails loudly at the read site with one of
//! these. Failures inside scheduled reactions are handed to the runtime's
//! error handler instead, so one misbehaving node never aborts a flush.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{NodeId, NodeKind};

/// Error type accepted from fallible derived and reaction bodies.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by the reactive engine.
///
/// Cloning is cheap: a failed derived hands the same error to every reader.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    #[error("cyclic dependency: derived {node:?} was read while it was being recomputed")]
    CyclicDependency {
        node: NodeId,
    },

    #[error("{kind} {node:?} was accessed after it was disposed")]
    DisposedNodeAccess {
        node: NodeId,
        kind: NodeKind,
    },

    #[error("{kind} {node:?} failed: {source}")]
    ReactionExecution {
        node: NodeId,
        kind: NodeKind,
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    #[error("flush did not settle after {passes} passes")]
    FlushLimitExceeded {
        passes: usize,
    },
}

impl ReactiveError {
    /// Wrap an error returned by a body.
    ///
    /// Engine errors (e.g. a cycle detected further down) pass through as-is.
    pub(crate) fn from_body(node: NodeId, kind: NodeKind, error: BoxError) -> Self {
        match error.downcast::<ReactiveError>() {
            Ok(inner) => *inner,
            Err(source) => Self::ReactionExecution {
                node,
                kind,
                source: Arc::from(source),
            },
        }
    }

    /// Wrap a panic payload caught while running a body.
    pub(crate) fn from_panic(node: NodeId, kind: NodeKind, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "body panicked".to_string()
        };

        Self::ReactionExecution {
            node,
            kind,
            source: Arc::from(BoxError::from(message)),
        }
    }

    /// The node the error is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::CyclicDependency { node }
            | Self::DisposedNodeAccess { node, .. }
            | Self::ReactionExecution { node, .. } => Some(*node),
            Self::FlushLimitExceeded { .. } => None,
        }
    }
}
