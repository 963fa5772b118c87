//! Error types for the event bus.
//!
//! Configuration errors (a category or scope without a dispatcher) surface at
//! resolution time. Handler failures propagate to whoever submitted the event.
//! Usage errors such as re-submitting a queued record are reported through the
//! diagnostic sink instead and never show up here.

use crate::scope::NodeId;

/// Errors produced by dispatchers, scope adapters and event handlers.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// No global dispatcher was installed for the category.
    #[error("No dispatcher registered for event category [{0}]")]
    CategoryNotRegistered(&'static str),
    /// Walking up from a node found no dispatcher for the category.
    #[error("No dispatcher for event category [{category}] found in the hierarchy above node {node}")]
    NoDispatcherInScope {
        category: &'static str,
        node: NodeId,
    },
    /// The node does not exist or has been despawned.
    #[error("Hierarchy node not found: {0}")]
    NodeNotFound(NodeId),
    /// A handler failed while processing an event.
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// A handler could not find something it needed.
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),
    /// An async handler was dispatched by a dispatcher with no `LocalSet`
    /// attached.
    #[error("Async handler {0} has no LocalSet to run on; attach one to its dispatcher")]
    NoAsyncRuntime(String),
    /// The task behind a completion handle was aborted.
    #[error("Async handler task was cancelled")]
    TaskCancelled,
    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EventError {
    /// Shorthand used by handlers that want to fail with a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerExecution(message.into())
    }

    /// Returns `true` for errors caused by missing dispatcher wiring.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CategoryNotRegistered(_) | Self::NoDispatcherInScope { .. } | Self::NodeNotFound(_)
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, EventError>;
