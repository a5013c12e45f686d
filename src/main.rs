//! `livereload` - serve a directory and reload the browser on file changes.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use livereload::cli::commands;
use livereload::cli::{Cli, Commands};
use livereload::config::{SETTINGS_FILE, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let settings = Settings::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    livereload::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, &settings).await,
        Commands::Script { endpoint } => {
            commands::script::run(endpoint, &settings);
            Ok(())
        }
        Commands::Config { write } => commands::config::run(write, &settings, &config_path),
    }
}
