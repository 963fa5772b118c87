//! Configuration management for the event bus demo.
//!
//! The configuration lives in a TOML file. A missing file is created with
//! the defaults on first run.

use anyhow::Context;
use event_bus::DispatchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const SEED_HEADER: &str = "# event-bus-demo settings. Delete this file to restore the defaults.";

/// Main application configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Settings applied to every dispatcher the demo creates
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub scenario: ScenarioSettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// What the scenarios send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSettings {
    /// Numbers sent through the queued path
    pub queued_numbers: Vec<i32>,
    /// Number sent through the immediate path
    pub immediate_number: i32,
    /// Rooms spawned under the hierarchy root, each with its own dispatcher
    pub rooms: usize,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            queued_numbers: vec![8, 15],
            immediate_number: 44,
            rooms: 2,
        }
    }
}

impl AppConfig {
    /// Reads the demo's `[dispatch]`, `[logging]` and `[scenario]` tables from
    /// `path`. Missing tables take their defaults. On first run the file does
    /// not exist yet and is seeded with the defaults so they can be edited.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let seeded = AppConfig::default();
            seeded.write_seed(path).await?;
            info!("📄 Seeded {} with the default scenario", path.display());
            return Ok(seeded);
        }

        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).with_context(|| format!("{} is not a valid demo config", path.display()))
    }

    async fn write_seed(&self, path: &Path) -> anyhow::Result<()> {
        let body = toml::to_string_pretty(self)?;
        tokio::fs::write(path, format!("{}\n{}", SEED_HEADER, body)).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.scenario.rooms == 0 {
            return Err("The hierarchy scenario needs at least one room".to_string());
        }

        Ok(())
    }
}
