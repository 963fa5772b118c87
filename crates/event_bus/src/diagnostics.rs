//! Diagnostic sinks.
//!
//! Dispatchers report two kinds of free-text lines: the per-dispatch debug
//! text of a record, and usage errors such as re-submitting a record that is
//! still queued. Emission is best-effort; a sink that drops everything is a
//! valid choice.

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// Severity of a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
}

/// Receiver for dispatcher diagnostics.
pub trait DiagnosticSink {
    fn emit(&self, level: LogLevel, category: &'static str, line: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: LogLevel, category: &'static str, line: &str) {
        match level {
            LogLevel::Debug => debug!(category, "{}", line),
            LogLevel::Warn => warn!(category, "{}", line),
        }
    }
}

/// Drops every diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _level: LogLevel, _category: &'static str, _line: &str) {}
}

/// Keeps diagnostics in memory so hosts and tests can inspect them.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Rc<RefCell<Vec<(LogLevel, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines in emission order.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.borrow().clone()
    }

    /// Captured lines of one level.
    pub fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, level: LogLevel, category: &'static str, line: &str) {
        self.lines
            .borrow_mut()
            .push((level, format!("[{}] {}", category, line)));
    }
}
