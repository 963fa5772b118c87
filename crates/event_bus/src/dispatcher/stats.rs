use serde::{Deserialize, Serialize};

/// Counters kept by one dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Records accepted through the queued path.
    pub events_queued: u64,
    /// Dispatch passes run, queued and immediate together.
    pub events_dispatched: u64,
    /// Dispatch passes started by `submit_immediate`.
    pub immediate_dispatches: u64,
    /// Submissions refused because the record was still queued.
    pub duplicates_rejected: u64,
    /// Handler invocations across all passes.
    pub handlers_invoked: u64,
    /// Passes aborted by a handler error.
    pub handler_failures: u64,
    /// Nested same-type passes that ran on a transient snapshot.
    pub transient_snapshots: u64,
    /// Bindings removed because their owner died.
    pub listeners_pruned: u64,
    /// Bindings currently registered.
    pub total_listeners: usize,
}
