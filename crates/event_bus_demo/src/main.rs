//! Event bus demo binary.
//!
//! Loads `event_bus.toml` (created with defaults when missing), runs the
//! global and hierarchy scenarios on a single-threaded runtime and prints
//! what each dispatcher saw as JSON.

mod cli;
mod config;
mod logging;
mod scenario;

use anyhow::{anyhow, Context, Result};
use cli::CliArgs;
use config::AppConfig;
use scenario::ScenarioReport;
use std::rc::Rc;
use tokio::task::LocalSet;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Every dispatcher launches its background saves on this set.
    let local = Rc::new(LocalSet::new());
    if let Err(e) = local.run_until(run(args, local.clone())).await {
        error!("❌ Demo failed: {:?}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: CliArgs, local: Rc<LocalSet>) -> Result<()> {
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .with_context(|| format!("loading {}", args.config_path.display()))?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate().map_err(|e| anyhow!(e))?;

    logging::setup_logging(&config.logging, args.json_logs)?;
    display_banner();

    let mut reports: Vec<ScenarioReport> = Vec::new();
    let wanted = args.scenario.as_deref();
    if wanted.is_none() || wanted == Some("global") {
        reports.push(scenario::run_global(&config.scenario, &config.dispatch, &local).await?);
    }
    if wanted.is_none() || wanted == Some("hierarchy") {
        reports.push(scenario::run_hierarchy(&config.scenario, &config.dispatch, &local).await?);
    }

    for report in &reports {
        info!(
            "✅ Scenario {} finished: {} background saves completed",
            report.scenario, report.saves_completed
        );
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║             📡 EVENT BUS DEMO            ║");
    info!("║                  v{:<8}               ║", version);
    info!("╚══════════════════════════════════════════╝");
}
