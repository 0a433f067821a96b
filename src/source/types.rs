//! Collaborator traits
//!
//! Everything that talks to the server sits behind one of these traits.
//! The orchestrator only ever sees these narrow interfaces.

use crate::error::Result;
use crate::position::{LogPosition, PositionMarker};
use crate::snapshot::PageRange;
use crate::types::{JsonValue, TableId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Facts reported by the server
// ============================================================================

/// Replication slot facts, read once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSlotInfo {
    /// Slot name
    pub slot_name: String,
    /// Oldest position the server still retains for this slot
    pub confirmed_flushed: LogPosition,
    /// Whether the slot exists
    pub exists: bool,
    /// Number of slots matching the name
    pub slot_count: usize,
}

/// Physical layout of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    /// Size of one page in bytes
    pub block_size: u64,
    /// Number of pages in the relation
    pub relation_pages: u64,
    /// Physical file backing the table
    #[serde(default)]
    pub file_node: Option<u32>,
    /// Highest tuple index on any page, for servers without range scans
    #[serde(default)]
    pub max_tuples_per_page: Option<u32>,
}

/// Everything a scanner needs to read one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Table to scan
    pub table: TableId,
    /// Layout the chunks were computed from
    pub layout: TableLayout,
    /// Page ranges to read, in order
    pub chunks: Vec<PageRange>,
    /// Rows at or before this marker were already emitted
    pub resume_after: Option<PositionMarker>,
}

/// A row produced by a positional scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    /// Physical address of the row
    pub marker: PositionMarker,
    /// Row key, if known
    pub key: Option<JsonValue>,
    /// Row attributes
    pub data: JsonValue,
}

/// An event read from the change log
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A row change
    Change {
        /// Table the change belongs to
        table: TableId,
        /// Position of the change
        position: LogPosition,
        /// Row key, if known
        key: Option<JsonValue>,
        /// Change payload
        data: JsonValue,
    },
    /// Everything up to this position has been delivered
    Checkpoint(LogPosition),
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Access to the server's change log
#[async_trait]
pub trait LogServer: Send + Sync {
    /// Look up the replication slot
    async fn slot_info(&self, slot: &str) -> Result<ReplicationSlotInfo>;

    /// Current end of the log
    async fn current_position(&self) -> Result<LogPosition>;

    /// Append activity so the log moves past its current position
    async fn advance_position(&self) -> Result<()>;
}

/// Advances server-side log retention
#[async_trait]
pub trait RetentionCommitter: Send + Sync {
    /// Acknowledge everything up to `target` for the slot
    async fn commit(
        &self,
        target: LogPosition,
        slot: &str,
        publication: &str,
        plugin: &str,
    ) -> Result<()>;
}

/// Reports physical layout metadata
#[async_trait]
pub trait LayoutProvider: Send + Sync {
    /// Layout for each requested table
    async fn layouts(&self, tables: &[TableId]) -> Result<HashMap<TableId, TableLayout>>;
}

/// Reports tables whose maintenance status makes positional scans unsafe
#[async_trait]
pub trait MaintenanceChecker: Send + Sync {
    /// Subset of `tables` currently undergoing maintenance
    async fn tables_under_maintenance(&self, tables: &[TableId]) -> Result<Vec<TableId>>;
}

/// Opens positional scans
#[async_trait]
pub trait SnapshotScanner: Send + Sync {
    /// Open a cursor over the requested chunks
    async fn open_scan(&self, request: &ScanRequest) -> Result<Box<dyn ScanCursor>>;
}

/// An open positional scan
#[async_trait]
pub trait ScanCursor: Send {
    /// Next row in ascending marker order, `None` once drained
    async fn next_row(&mut self) -> Result<Option<ScannedRow>>;

    /// Release the cursor
    async fn close(&mut self) -> Result<()>;
}

/// Opens the change log
#[async_trait]
pub trait ChangeFeedReader: Send + Sync {
    /// Start reading changes after `from` for the given tables
    async fn open_feed(&self, from: LogPosition, tables: &[TableId])
        -> Result<Box<dyn ChangeCursor>>;
}

/// An open change log reader
#[async_trait]
pub trait ChangeCursor: Send {
    /// Next event, `None` if the feed ended
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>>;

    /// Release the reader
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Collaborator Bundle
// ============================================================================

/// All server-side collaborators of a run
#[derive(Clone)]
pub struct SourceCollaborators {
    pub log_server: Arc<dyn LogServer>,
    pub committer: Arc<dyn RetentionCommitter>,
    pub layouts: Arc<dyn LayoutProvider>,
    pub maintenance: Arc<dyn MaintenanceChecker>,
    pub scanner: Arc<dyn SnapshotScanner>,
    pub change_feed: Arc<dyn ChangeFeedReader>,
}

impl SourceCollaborators {
    /// Use one value for every collaborator
    pub fn from_source<S>(source: Arc<S>) -> Self
    where
        S: LogServer
            + RetentionCommitter
            + LayoutProvider
            + MaintenanceChecker
            + SnapshotScanner
            + ChangeFeedReader
            + 'static,
    {
        Self {
            log_server: source.clone(),
            committer: source.clone(),
            layouts: source.clone(),
            maintenance: source.clone(),
            scanner: source.clone(),
            change_feed: source,
        }
    }
}

impl std::fmt::Debug for SourceCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCollaborators").finish_non_exhaustive()
    }
}
