//! Scenecast CLI: render animation scripts and follow the engine's output.
//!
//! Usage:
//!   scenecast render <SCRIPT> [OPTIONS]   Render a script, streaming logs
//!   scenecast check                       Check engine and workspace setup

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scenecast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "scenecast",
    about = "Render animation scripts with live engine logs",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene script
    Render {
        /// Path to the script
        script: PathBuf,

        /// Quality preset: draft|medium|high|ultra (or -ql/-qm/-qh/-qk)
        #[arg(short, long, default_value = "medium", allow_hyphen_values = true)]
        quality: String,

        /// Transparent background
        #[arg(long)]
        transparent: bool,

        /// Portrait (9:16) output
        #[arg(long)]
        vertical: bool,

        /// Print the final outcome as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Check engine availability and workspace setup
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, config_error) = match &cli.config {
        Some(path) => (AppConfig::load_from(path)?, None),
        None => AppConfig::load_or_default(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    scenecast_common::logging::init_logging(&config.logging);
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Ignoring unreadable config file, using defaults");
    }

    match cli.command {
        Commands::Render {
            script,
            quality,
            transparent,
            vertical,
            json,
        } => commands::render::run(config, script, quality, transparent, vertical, json).await,
        Commands::Check => commands::check::run(&config),
    }
}
