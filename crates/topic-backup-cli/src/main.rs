use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "topic-backup")]
#[command(about = "Topic backup, restore and verification tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a topic
    Get {
        /// Topic to back up
        #[arg(long)]
        topic: String,

        /// Destination directory (V3) or backup file (V2)
        #[arg(long)]
        location: PathBuf,

        /// Write the V3 format instead of V2
        #[arg(long)]
        use_format_v3: bool,

        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Restore a backup into a topic
    Restore {
        /// Topic to restore into
        #[arg(long)]
        topic: String,

        /// Metadata file, backup directory, or V1/V2 backup file
        #[arg(long)]
        location: PathBuf,

        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a JSON description of a backup
    Inspect {
        /// Metadata file, backup directory, or V1/V2 backup file
        #[arg(long)]
        location: PathBuf,
    },

    /// Verify the integrity of a V3 backup
    Verify {
        /// Metadata file or backup directory
        #[arg(long)]
        location: PathBuf,

        /// Verification level (file, record)
        #[arg(long, default_value = "file")]
        level: String,

        /// Treat data files with an unknown checksum algorithm as failures
        #[arg(long)]
        unknown_as_failure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Get {
            topic,
            location,
            use_format_v3,
            config,
        } => {
            commands::get::run(&topic, &location, use_format_v3, config.as_deref()).await?;
        }
        Commands::Restore {
            topic,
            location,
            config,
        } => {
            commands::restore::run(&topic, &location, config.as_deref()).await?;
        }
        Commands::Inspect { location } => {
            commands::inspect::run(&location)?;
        }
        Commands::Verify {
            location,
            level,
            unknown_as_failure,
        } => {
            commands::verify::run(&location, &level, unknown_as_failure)?;
        }
    }

    Ok(())
}
