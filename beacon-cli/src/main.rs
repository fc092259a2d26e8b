use anyhow::Result;
use beacon_observe::init_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "beacon", about = "Exposure telemetry for feature flags")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the user and project files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Replay recorded evaluations through the exposure pipeline
    Replay(commands::replay::ReplayArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::ConfigLoader::load(cli.config.as_deref())?;
    init_logging(&config.logging.clone().with_verbose(cli.verbose))?;

    match cli.command {
        Commands::Config(args) => commands::config::run(args, &config),
        Commands::Replay(args) => commands::replay::run(args, &config),
    }
}
