//! # Queue-Salvage
//!
//! Binary entry point.
//!
//! Exit codes: 0 on success, 1 when a command fails, 3 when the
//! configuration cannot be loaded or is invalid.

use anyhow::Context;
use clap::Parser;
use queue_salvage_service::config::LoggingConfig;
use queue_salvage_service::{execute, logging, Cli, Components, ServiceConfig};
use tracing::{error, info};

const EXIT_RUNTIME_ERROR: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut service_config = match ServiceConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            if !logging::init_or_report(&LoggingConfig::default()) {
                eprintln!("Service configuration is invalid: {}", e);
            }
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(level) = &cli.log_level {
        service_config.logging.level = level.clone();
    }
    if cli.json_logs {
        service_config.logging.json_format = true;
    }
    logging::init_or_report(&service_config.logging);

    if let Err(e) = run(cli, &service_config).await {
        error!(error = %format!("{:#}", e), "Command failed");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli, config: &ServiceConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Queue-Salvage");

    let components = Components::build(config)
        .await
        .context("failed to initialize components")?;

    let output = execute(cli.command, config, &components)
        .await
        .context("command failed")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
