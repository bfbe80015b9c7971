//! Harken CLI - landmark audio search toolkit
//!
//! Features:
//! - Reference ingestion into a SQLite fingerprint index
//! - Identification of audio files against the index
//! - Live Icecast stream monitoring with per-song score epochs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Harken - acoustic fingerprinting and stream identification
#[derive(Parser)]
#[command(name = "harken")]
#[command(version)]
#[command(about = "Landmark audio search toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to the fingerprint database
    #[arg(long, default_value = "harken.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint audio files into the index
    Ingest {
        /// Audio files to ingest
        files: Vec<PathBuf>,

        /// Maximum files fingerprinted in parallel
        #[arg(short, long, default_value = "8")]
        jobs: usize,

        /// Metadata for the recording (single file only); defaults to the
        /// file stem
        #[arg(short, long)]
        meta: Option<String>,
    },

    /// Identify a recording from an audio file
    Identify {
        /// Audio file to identify
        file: PathBuf,

        /// Number of candidates to show
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },

    /// Monitor an Icecast stream and identify what plays
    Listen {
        /// Stream URL
        url: String,

        /// Analysis window length in seconds
        #[arg(short, long, default_value = "20")]
        window: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .init();

    match cli.command {
        Commands::Ingest { files, jobs, meta } => {
            commands::ingest(&cli.db, files, jobs, meta, &cli.format).await?;
        }
        Commands::Identify { file, top } => {
            commands::identify(&cli.db, file, top, &cli.format).await?;
        }
        Commands::Listen { url, window } => {
            commands::listen(&cli.db, &url, window).await?;
        }
    }

    Ok(())
}
