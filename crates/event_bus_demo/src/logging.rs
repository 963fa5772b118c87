//! Logging setup for the demo binary.
//!
//! The bus reports through `tracing` under the `event_bus` target, tagging
//! each diagnostic line with the category that produced it. The configured
//! level applies to the bus and to the demo itself; everything else stays at
//! `warn` so runtime internals do not drown the walkthrough.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives for `level`.
pub fn directives(level: &str) -> String {
    format!("warn,event_bus={level},event_bus_demo={level}")
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// directives built from the config; `json` or `json_format` switches to one
/// JSON object per line.
pub fn setup_logging(config: &LoggingSettings, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(&config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if json || config.json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_file(false).with_line_number(false))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_target(false).with_file(false).with_line_number(false))
            .try_init()?;
    }

    info!("🔧 Event bus diagnostics at level {}", config.level);
    Ok(())
}
