// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy CDC
//!
//! Hybrid snapshot + change-log replication for a single source database.
//!
//! Each run validates the saved log checkpoint against the server's
//! retention window, decides which tables need a positional scan and which
//! can be read from the change log alone, and returns a lazy stream that
//! scans tables one at a time before tailing the log.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_cdc::{CdcConfig, FixtureSource, MemoryStateStore, Orchestrator, SourceCollaborators};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> solidafy_cdc::Result<()> {
//!     let config = CdcConfig::from_file("sync.yaml")?;
//!     let source = Arc::new(FixtureSource::from_file("source.yaml")?);
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         SourceCollaborators::from_source(source),
//!         Arc::new(MemoryStateStore::new()),
//!     );
//!
//!     let mut output = orchestrator.run().await?;
//!     while let Some(message) = output.stream.next().await? {
//!         // Process messages
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  validate → classify → eligibility → commit/advance → stages     │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//! ┌────────────┬─────────────┬────┴────────┬────────────┬────────────┐
//! │ Retention  │  Classify   │ Eligibility │  Snapshot  │ Changefeed │
//! ├────────────┼─────────────┼─────────────┼────────────┼────────────┤
//! │ Slot check │ Snapshot vs │ Maintenance │ Chunks     │ Filtering  │
//! │ Policy     │ log-only    │ exclusions  │ Markers    │ Checkpoints│
//! │ Commit     │             │             │            │            │
//! └────────────┴─────────────┴─────────────┴────────────┴────────────┘
//!                                 │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │           SyncStream (owns GlobalSyncState) → StateStore          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Log positions and scan markers
pub mod position;

/// Sync configuration
pub mod config;

/// Sync state and persistence
pub mod state;

/// Collaborator traits and the in-memory source
pub mod source;

/// Retention window validation and commits
pub mod retention;

/// Snapshot / log-only classification
pub mod classify;

/// Snapshot eligibility
pub mod eligibility;

/// Positional scan chunks and stage
pub mod snapshot;

/// Change log tail stage
pub mod changefeed;

/// Lazy stage sequencing
pub mod stream;

/// Run state machine
pub mod orchestrator;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::{CdcConfig, InvalidCursorPolicy, LsnCommitBehaviour};
pub use orchestrator::{Handoff, Orchestrator, SyncOutput, SyncPlan};
pub use position::{LogPosition, PositionMarker};
pub use source::{FixtureSource, SourceCollaborators};
pub use state::{FileStateStore, GlobalSyncState, MemoryStateStore, StateStore, TableSyncState};
pub use stream::{MessageStream, SyncStream};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
