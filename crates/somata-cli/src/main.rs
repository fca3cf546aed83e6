mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "somata", about = "Resumable calcium-imaging ROI pipeline")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show raw source metadata
    Info(commands::info::InfoArgs),
    /// Register, detect and classify a session
    Run(commands::run::RunArgs),
    /// Show stored results and effective labels
    Load(commands::load::LoadArgs),
    /// Set or clear a manual cell label
    Curate(commands::curate::CurateArgs),
    /// Review overrides set aside after re-detection
    Quarantine(commands::quarantine::QuarantineArgs),
    /// Print or save a default pipeline config
    Config(commands::config::ConfigArgs),
    /// Remove plane locks left behind by a crashed run
    Unlock(commands::unlock::UnlockArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Load(args) => commands::load::run(args),
        Commands::Curate(args) => commands::curate::run(args),
        Commands::Quarantine(args) => commands::quarantine::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Unlock(args) => commands::unlock::run(args),
    }
}
