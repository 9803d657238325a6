//! kvexport CLI
//!
//! Parallel, rate-controlled export of a partitioned key-value table.
//!
//! # Commands
//!
//! - `plan` - Print the split plan for a job as JSON
//! - `export` - Export a table, one worker thread per split
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::JobArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Export partitioned key-value tables under a read budget.
#[derive(Parser)]
#[command(name = "kvexport")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the split plan as JSON
    Plan {
        #[command(flatten)]
        job: JobArgs,

        /// Number of parallel workers
        #[arg(short, long, default_value = "1")]
        workers: u32,
    },

    /// Export the table to newline-delimited JSON files
    Export {
        #[command(flatten)]
        job: JobArgs,

        /// Directory receiving one part file per split
        #[arg(short, long)]
        output_path: PathBuf,

        /// Number of parallel workers
        #[arg(short, long, default_value = "1")]
        workers: u32,
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
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Plan { job, workers } => {
            commands::plan::run(&job, workers)?;
        }
        Commands::Export {
            job,
            output_path,
            workers,
        } => {
            commands::export::run(&job, &output_path, workers)?;
        }
        Commands::Version => {
            println!("kvexport v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
