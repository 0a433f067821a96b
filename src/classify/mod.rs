//! Stream classification
//!
//! Splits the requested tables into those that need a positional scan and
//! those whose snapshot is finished and only need the change log.

use crate::state::GlobalSyncState;
use crate::types::TableId;
use serde::Serialize;

/// Requested tables split by how they are read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamPartition {
    /// Tables needing a positional scan, in requested order
    pub snapshot: Vec<TableId>,
    /// Tables read from the change log only, in requested order
    pub log_only: Vec<TableId>,
}

impl StreamPartition {
    /// Whether nothing needs scanning
    pub fn is_log_only(&self) -> bool {
        self.snapshot.is_empty()
    }
}

/// Pure, deterministic classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamClassifier;

impl StreamClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify `requested` against the saved state.
    ///
    /// With an invalid checkpoint every table is re-snapshotted, whatever the
    /// state says.
    pub fn classify(
        &self,
        requested: &[TableId],
        state: &GlobalSyncState,
        still_valid: bool,
    ) -> StreamPartition {
        let mut partition = StreamPartition::default();
        for table in requested {
            if !still_valid || state.table_state(table).needs_snapshot() {
                partition.snapshot.push(table.clone());
            } else {
                partition.log_only.push(table.clone());
            }
        }
        partition
    }
}
