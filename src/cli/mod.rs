//! CLI module
//!
//! Command-line interface for running syncs against a source definition.
//!
//! # Commands
//!
//! - `check` - Validate config, replication slot and saved checkpoint
//! - `plan` - Show the handoff decision and stages (always a dry run)
//! - `read` - Run a sync and save state
//! - `state` - Print the saved state

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat, DEFAULT_STATE_DIR};
pub use runner::Runner;
