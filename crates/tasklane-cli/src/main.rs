//! Tasklane CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tasklane_cli::{AppConfig, Cli, CommandDispatcher, Result};

// Plain main: the wait protocols block the calling thread, and the harness
// runs its own runtime for the task workers.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_configuration(&cli).context("Failed to load configuration")?;
    setup_logging(cli.verbose || config.cli.verbose);
    match &cli.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("Using default configuration"),
    }

    CommandDispatcher::execute(cli, config).context("Command execution failed")?;
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        AppConfig::load_from_file(config_path)
    } else {
        Ok(AppConfig::default())
    }
}
