//! lectag CLI: the main entry point.
//!
//! Commands:
//! - `train`    Build and calibrate prototypes from pre-embedded examples
//! - `score`    Rank a document embedding against the active prototypes
//! - `versions` List archived prototype versions
//! - `config`   Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lectag",
    about = "lectag: lecture tag suggestion from learned prototypes",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, calibrate and archive a new prototype set
    Train {
        /// JSON file with `tags`, `examples` and optional `label_embeddings` / `holdout`
        #[arg(short, long)]
        data: PathBuf,

        /// Override the train/holdout split used when no holdout is given
        #[arg(long)]
        holdout_split: Option<f32>,
    },

    /// Score a document embedding against the active prototype set
    Score {
        /// JSON file with the document `embedding`
        #[arg(short, long)]
        data: PathBuf,

        /// Number of ranked tags to print
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List archived prototype versions
    Versions,

    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead of the loaded configuration
        #[arg(long)]
        defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Train { data, holdout_split } => commands::train::run(&data, holdout_split).await?,
        Commands::Score { data, limit } => commands::score::run(&data, limit).await?,
        Commands::Versions => commands::versions::run().await?,
        Commands::Config { defaults } => commands::config_cmd::show(defaults)?,
    }

    Ok(())
}
