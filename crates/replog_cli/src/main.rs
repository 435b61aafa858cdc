//! replog CLI
//!
//! Command-line tools for replog changelog directories.
//!
//! # Commands
//!
//! - `inspect` - List the files of a log with their key ranges
//! - `dump` - Print records, or write one text file per log file
//! - `verify` - Check framing, decoding and key order of every file
//! - `purge` - Delete sealed files up to a key

mod commands;

use clap::{Parser, Subcommand};
use commands::{CodecKind, OutputFormat};
use replog_core::DEFAULT_BLOCK_SIZE;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// replog changelog tools.
#[derive(Parser)]
#[command(name = "replog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Record codec of the log
    #[arg(global = true, short, long, value_enum, default_value_t = CodecKind::Update)]
    codec: CodecKind,

    /// Block size the log was written with
    #[arg(global = true, short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files of a log with their key ranges
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print records of a log
    Dump {
        /// Start at this key token (inclusive)
        #[arg(long)]
        from: Option<String>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Write one text file per log file into this directory instead
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check framing, decoding and key order of every file
    Verify,

    /// Delete sealed files whose keys are all up to a key
    Purge {
        /// Key token to purge up to (inclusive)
        #[arg(long)]
        up_to: String,

        /// Dry run - show what would be deleted
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let codec = cli.codec;
    let block_size = cli.block_size;
    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            let report =
                commands::with_codec!(codec, c => commands::inspect::run(&path, c, block_size))?;
            commands::inspect::print(&report, format)?;
        }
        Commands::Dump {
            from,
            limit,
            out_dir,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            let options = commands::dump::DumpOptions {
                block_size,
                from,
                limit,
                out_dir,
                format,
            };
            commands::with_codec!(codec, c => commands::dump::run(&path, c, &options))?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            let report =
                commands::with_codec!(codec, c => commands::verify::run(&path, c, block_size))?;
            commands::verify::print(&report);
            if !report.is_ok() {
                return Err(commands::CliError::VerificationFailed {
                    problems: report.problems.len(),
                }
                .into());
            }
        }
        Commands::Purge { up_to, dry_run } => {
            let path = cli.path.ok_or("Log path required for purge")?;
            commands::with_codec!(codec, c => {
                commands::purge::run(&path, c, block_size, &up_to, dry_run)
            })?;
        }
        Commands::Version => {
            println!("replog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
