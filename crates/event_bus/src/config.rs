//! Dispatcher configuration.
//!
//! Every field has a serde default, so a host can embed a partial
//! `[dispatch]` table in its own TOML file.

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};

fn default_emit_debug_data() -> bool {
    true
}

fn default_capture_origin() -> bool {
    cfg!(debug_assertions)
}

fn default_queue_capacity() -> usize {
    16
}

/// Settings shared by every dispatcher created from the same configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Surface each record's debug text once per dispatch.
    #[serde(default = "default_emit_debug_data")]
    pub emit_debug_data: bool,
    /// Stamp the acquiring source file on pooled records.
    #[serde(default = "default_capture_origin")]
    pub capture_origin: bool,
    /// Report events that reach a dispatcher with no matching handler.
    #[serde(default)]
    pub warn_unhandled: bool,
    /// Pre-allocated length of the submission queue.
    #[serde(default = "default_queue_capacity")]
    pub initial_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            emit_debug_data: default_emit_debug_data(),
            capture_origin: default_capture_origin(),
            warn_unhandled: false,
            initial_queue_capacity: default_queue_capacity(),
        }
    }
}

impl DispatchConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EventError::Config(e.to_string()))
    }

    pub fn with_debug_data(mut self, enabled: bool) -> Self {
        self.emit_debug_data = enabled;
        self
    }

    pub fn with_origin_capture(mut self, enabled: bool) -> Self {
        self.capture_origin = enabled;
        self
    }

    pub fn with_unhandled_warnings(mut self, enabled: bool) -> Self {
        self.warn_unhandled = enabled;
        self
    }
}
