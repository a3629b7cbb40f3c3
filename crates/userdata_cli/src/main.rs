//! User Data CLI
//!
//! Command-line tools for inspecting and maintaining a user-data store.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics, cursors and entity counts
//! - `verify` - Check journal integrity without modifying it
//! - `compact` - Purge expired tombstones and rewrite the journal
//! - `dump-changes` - List pending local changes

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// User-data store maintenance tools.
#[derive(Parser)]
#[command(name = "userdata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Show per-kind entity counts
        #[arg(short, long)]
        kinds: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify journal integrity
    Verify,

    /// Purge expired tombstones and rewrite the journal
    Compact {
        /// Keep tombstones, only rewrite the journal
        #[arg(short, long)]
        keep_tombstones: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// List pending local changes
    DumpChanges {
        /// Maximum number of changes to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { kinds, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, kinds, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact {
            keep_tombstones,
            dry_run,
        } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, !keep_tombstones, dry_run)?;
        }
        Commands::DumpChanges { limit, format } => {
            let path = cli.path.ok_or("Store path required for dump-changes")?;
            commands::dump_changes::run(&path, limit, format)?;
        }
        Commands::Version => {
            println!("User Data CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("User Data Core v{}", userdata_core::VERSION);
        }
    }

    Ok(())
}
