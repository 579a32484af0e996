//! fxsync CLI
//!
//! Command-line tools for inspecting FastTransfer streams and
//! synchronization state.
//!
//! # Commands
//!
//! - `decode` - Decode a stream file and summarize its contents
//! - `idset` - Decode a hex IDSET and list its ranges
//! - `pcl-compare` - Compare two hex predecessor change lists

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FastTransfer stream inspection tools.
#[derive(Parser)]
#[command(name = "fxsync")]
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
    /// Decode a stream file and summarize its contents
    Decode {
        /// File holding the stream
        file: PathBuf,

        /// Stream type (top-folder, folder-content, message-content,
        /// attachment-content, message-list, contents-sync, hierarchy-sync, state)
        #[arg(short, long)]
        kind: String,

        /// The file holds hex text instead of raw bytes
        #[arg(long)]
        hex: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a hex IDSET and list its ranges
    Idset {
        /// Hex-encoded IDSET
        hex: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compare two hex predecessor change lists
    PclCompare {
        /// First PCL (hex)
        a: String,

        /// Second PCL (hex)
        b: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Decode {
            file,
            kind,
            hex,
            format,
        } => {
            commands::decode::run(&file, &kind, hex, &format)?;
        }
        Commands::Idset { hex, format } => {
            commands::idset::run(&hex, &format)?;
        }
        Commands::PclCompare { a, b, format } => {
            commands::pcl::run(&a, &b, &format)?;
        }
        Commands::Version => {
            println!("fxsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("fxsync core v{}", fxsync_core::VERSION);
        }
    }

    Ok(())
}
