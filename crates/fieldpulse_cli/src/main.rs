//! FieldPulse CLI
//!
//! Command-line tools for running the delivery controller and examining
//! position journals.
//!
//! # Commands
//!
//! - `track` - Deliver fixes read as JSON lines to a collector
//! - `inspect` - Show the positions waiting in a journal
//! - `verify` - Check a journal for damage
//! - `version` - Show version information

mod commands;
mod probe;
mod source;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldPulse position delivery tools.
#[derive(Parser)]
#[command(name = "fieldpulse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the position journal
    #[arg(global = true, short, long)]
    queue: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver fixes to a collector
    Track {
        /// Collector endpoint URL
        #[arg(short, long)]
        url: String,

        /// Device identifier
        #[arg(short, long)]
        device: String,

        /// Send fixes directly without persisting them
        #[arg(long)]
        no_buffer: bool,

        /// Delay before retrying a failed delivery
        #[arg(long, default_value = "30000")]
        retry_delay_ms: u64,

        /// File with one JSON fix per line, or - for stdin
        #[arg(short, long, default_value = "-")]
        fixes: String,

        /// Pause between fixes read from the input
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Interval between connectivity probes
        #[arg(long, default_value = "5000")]
        probe_interval_ms: u64,

        /// Stop once the input is exhausted and the queue is drained
        #[arg(long)]
        exit_on_eof: bool,
    },

    /// Show the positions waiting in a journal
    Inspect {
        /// Maximum number of positions to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check a journal for damage
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Track {
            url,
            device,
            no_buffer,
            retry_delay_ms,
            fixes,
            interval_ms,
            probe_interval_ms,
            exit_on_eof,
        } => {
            let options = commands::track::TrackOptions {
                url,
                device,
                buffering: !no_buffer,
                retry_delay_ms,
                fixes,
                interval_ms,
                probe_interval_ms,
                exit_on_eof,
                queue: cli.queue,
            };
            commands::track::run(options)?;
        }
        Commands::Inspect { limit, format } => {
            let path = cli.queue.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.queue.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("FieldPulse CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Journal format v{} ({})",
                fieldpulse_core::JOURNAL_VERSION,
                String::from_utf8_lossy(&fieldpulse_core::JOURNAL_MAGIC)
            );
        }
    }

    Ok(())
}
