//! CLI argument parsing using clap.

use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Browser live reload for local development
#[derive(Parser, Debug)]
#[command(
    name = "livereload",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serve a directory and reload the browser when files change",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to a livereload.toml settings file
    #[arg(short, long, global = true, env = "LIVERELOAD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a static directory with live reload
    #[command(
        after_help = "Examples:\n  livereload serve\n  livereload serve public --bind 0.0.0.0:8000\n  livereload serve dist --watch src --watch templates"
    )]
    Serve(ServeArgs),

    /// Print the client script for embedding in your own templates
    Script {
        /// Notification endpoint the script connects to
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Display the effective settings
    Config {
        /// Write the settings to the config file instead of printing them
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Directory to serve (default: server.root)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Address to bind to (default: server.bind)
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to watch; repeatable (default: the served directory)
    #[arg(short, long, value_name = "DIR")]
    pub watch: Vec<PathBuf>,

    /// Notification endpoint path
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Don't add Cache-Control: no-cache to pages
    #[arg(long)]
    pub allow_caching: bool,

    /// Quiet window in milliseconds before a reload fires
    #[arg(long)]
    pub debounce_ms: Option<u64>,
}
