//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default directory for persisted sync state
pub const DEFAULT_STATE_DIR: &str = ".solidafy-state";

/// Solidafy CDC command-line interface
#[derive(Parser, Debug)]
#[command(name = "solidafy-cdc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Sync configuration file (YAML or JSON)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Source definition file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub source: Option<PathBuf>,

    /// Directory holding persisted state
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration, the replication slot and the saved checkpoint
    Check,

    /// Show what a sync would do without committing anything
    Plan,

    /// Run a sync, emitting messages as JSON lines and saving state
    Read {
        /// Override the configured table list (comma-separated)
        #[arg(long)]
        tables: Option<String>,

        /// Never acknowledge log positions to the server
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the saved state
    State,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
