//! SessionVault - persistent conversation session store
//!
#![doc = "SessionVault - persistent conversation session store"]
#![doc = "Main entry point for the sessionvault command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sessionvault::cli::Cli;
use sessionvault::commands;
use sessionvault::config::Config;
use sessionvault::storage::StorageManager;

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let storage = StorageManager::from_config(&config.storage)?;
    tracing::debug!(backend = %storage.backend_kind(), "Dispatching command");

    commands::execute(cli.command, &config, &storage)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "sessionvault=debug"
    } else {
        "sessionvault=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
