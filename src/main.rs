//! cdcwatch - change-data-capture event consumer
//!
#![doc = "cdcwatch - change-data-capture event consumer"]
#![doc = "Main entry point for the cdcwatch binary."]

use anyhow::Result;

use cdcwatch::cli::{Cli, Commands};
use cdcwatch::commands;
use cdcwatch::config::Config;
use cdcwatch::metrics::init_metrics_exporter;
use cdcwatch::watcher::logging::{init_logging, with_startup_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();
    let overrides = cli.to_overrides();

    // Load configuration; its warnings go to STDERR until logging is set up
    let config_path = cli.config.as_deref().unwrap_or("config/cdcwatch.yaml");
    let config = with_startup_logging(std::io::stderr, || {
        Config::load(config_path, &overrides)
    })?;

    // Validate configuration
    config.validate()?;

    init_logging(&config.logging)?;
    init_metrics_exporter();

    match cli.command {
        Commands::Watch { .. } => {
            commands::watch::run_watch(config).await?;
            Ok(())
        }
        Commands::Probe { .. } => {
            tracing::info!("Starting connectivity probe");
            commands::probe::run_probe(config).await?;
            Ok(())
        }
    }
}
