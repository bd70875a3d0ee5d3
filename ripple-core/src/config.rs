//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Options for a [`Runtime`](crate::Runtime).
///
/// Every field has a default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Serialize every public operation behind a reentrant lock so that
    /// producers on several threads can share one graph. Off by default:
    /// the graph is meant to be driven from a single owner thread.
    pub thread_safe: bool,

    /// Report reads and writes of disposed nodes as
    /// [`ReactiveError::DisposedNodeAccess`](crate::ReactiveError::DisposedNodeAccess)
    /// instead of tolerating them.
    pub strict_disposal: bool,

    /// Passes a single flush may take before it is abandoned with
    /// [`ReactiveError::FlushLimitExceeded`](crate::ReactiveError::FlushLimitExceeded).
    pub max_flush_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_safe: false,
            strict_disposal: false,
            max_flush_passes: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn thread_safe(mut self, enabled: bool) -> Self {
        self.thread_safe = enabled;
        self
    }

    pub fn strict_disposal(mut self, enabled: bool) -> Self {
        self.strict_disposal = enabled;
        self
    }

    pub fn max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }
}
