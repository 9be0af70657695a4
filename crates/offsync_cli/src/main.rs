//! offsync CLI
//!
//! Command-line tools for inspecting and repairing an offsync record store.
//!
//! # Commands
//!
//! - `inspect` - Display record counts, in-flight records and the pull cursor
//! - `conflicts` - List unresolved conflicts with both sides
//! - `resolve` - Settle a conflict in favour of one side
//! - `recover` - Demote records a crashed process left in flight
//! - `release` - Return a quarantined record to automatic processing
//! - `compact` - Rewrite the store log

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync record store tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the record store file
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Side {
    /// The device's version.
    Local,
    /// The server's version.
    Server,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts and sync bookkeeping
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List unresolved conflicts
    Conflicts {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Settle a conflict
    Resolve {
        /// Record id
        id: String,

        /// Side to keep
        #[arg(short, long, value_enum)]
        take: Side,
    },

    /// Demote records left in flight by a crashed process
    Recover,

    /// Return a quarantined record to automatic processing
    Release {
        /// Record id
        id: String,
    },

    /// Compact the store log
    Compact {
        /// Dry run - show the current size only
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
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
        Commands::Inspect { format } => {
            let path = cli.store.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Conflicts { format } => {
            let path = cli.store.ok_or("Store path required for conflicts")?;
            commands::conflicts::run(&path, &format)?;
        }
        Commands::Resolve { id, take } => {
            let path = cli.store.ok_or("Store path required for resolve")?;
            commands::resolve::run(&path, &id, take)?;
        }
        Commands::Recover => {
            let path = cli.store.ok_or("Store path required for recover")?;
            commands::recover::run(&path)?;
        }
        Commands::Release { id } => {
            let path = cli.store.ok_or("Store path required for release")?;
            commands::release::run(&path, &id)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.store.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
