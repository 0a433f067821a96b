//! Stage interface and events

use crate::error::Result;
use crate::position::LogPosition;
use crate::state::SnapshotProgress;
use crate::types::{Record, SourceKind, TableId};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// What a stage reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    /// Snapshot or log tail
    pub kind: SourceKind,
    /// Tables covered by the stage
    pub tables: Vec<TableId>,
}

impl StageDescriptor {
    /// Snapshot of one table
    pub fn snapshot(table: TableId) -> Self {
        Self {
            kind: SourceKind::Snapshot,
            tables: vec![table],
        }
    }

    /// Log tail for a set of tables
    pub fn log_tail(tables: Vec<TableId>) -> Self {
        Self {
            kind: SourceKind::LogTail,
            tables,
        }
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<String> = self.tables.iter().map(ToString::to_string).collect();
        write!(f, "{}[{}]", self.kind, tables.join(", "))
    }
}

/// Something a stage produced
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// A record, with the snapshot progress it represents
    Record {
        record: Record,
        progress: Option<SnapshotProgress>,
    },
    /// A table's positional scan drained
    SnapshotComplete(TableId),
    /// The log was delivered up to this position
    LogCheckpoint(LogPosition),
}

/// A two-phase record source.
///
/// Construction must not touch the server. Resources are acquired in
/// [`Stage::open`] and released in [`Stage::close`], which must be safe to
/// call more than once.
#[async_trait]
pub trait Stage: Send {
    /// What this stage reads
    fn describe(&self) -> StageDescriptor;

    /// Acquire resources
    async fn open(&mut self) -> Result<()>;

    /// Next event, `None` once drained
    async fn next(&mut self) -> Result<Option<StageEvent>>;

    /// Release resources
    async fn close(&mut self) -> Result<()>;
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Records from positional scans
    pub snapshot_records: usize,
    /// Records from the change log
    pub log_records: usize,
    /// Tables whose snapshot finished this run
    pub tables_completed: usize,
    /// State messages emitted
    pub state_messages: usize,
    /// Stages opened
    pub stages_opened: usize,
}

impl StreamStats {
    /// Total records emitted
    pub fn records(&self) -> usize {
        self.snapshot_records + self.log_records
    }
}
