//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs.

use crate::position::{LogPosition, PositionMarker};
use crate::types::TableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress of an interrupted positional scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProgress {
    /// Last marker emitted for the table
    pub marker: PositionMarker,
    /// Physical file backing the table when the marker was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_node: Option<u32>,
}

impl SnapshotProgress {
    /// Create progress at a marker
    pub fn new(marker: PositionMarker, file_node: Option<u32>) -> Self {
        Self { marker, file_node }
    }
}

/// Per-table sync state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableSyncState {
    /// Never snapshotted
    #[default]
    NotStarted,

    /// Snapshot interrupted part way through
    SnapshotInProgress(SnapshotProgress),

    /// Snapshot finished; changes come from the log only
    SnapshotComplete,

    /// Skipped this run because it was not safe to scan. Retried next run.
    ExcludedThisRun {
        /// Why the table was skipped
        reason: String,
        /// In-progress marker carried over from before the exclusion
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume: Option<SnapshotProgress>,
    },
}

impl TableSyncState {
    /// Whether the table still needs a positional scan
    pub fn needs_snapshot(&self) -> bool {
        !matches!(self, Self::SnapshotComplete)
    }

    /// Progress to resume from, if any
    pub fn resume_progress(&self) -> Option<SnapshotProgress> {
        match self {
            Self::SnapshotInProgress(progress) => Some(*progress),
            Self::ExcludedThisRun { resume, .. } => *resume,
            _ => None,
        }
    }
}

/// Complete state for one sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSyncState {
    /// Log position every table is consistent with
    pub last_known_log_position: LogPosition,

    /// Per-table state
    #[serde(default, with = "table_entries")]
    pub tables: BTreeMap<TableId, TableSyncState>,
}

impl GlobalSyncState {
    /// Synthesize a first-run state anchored at the given position
    pub fn fresh(position: LogPosition) -> Self {
        Self {
            last_known_log_position: position,
            tables: BTreeMap::new(),
        }
    }

    /// State for a table; absent tables have not started
    pub fn table_state(&self, table: &TableId) -> TableSyncState {
        self.tables.get(table).cloned().unwrap_or_default()
    }

    /// Set state for a table
    pub fn set_table_state(&mut self, table: TableId, state: TableSyncState) {
        self.tables.insert(table, state);
    }

    /// Advance the log position; regressions are ignored.
    ///
    /// Returns `true` if the position moved forward.
    pub fn advance_log_position(&mut self, position: LogPosition) -> bool {
        if position > self.last_known_log_position {
            self.last_known_log_position = position;
            true
        } else {
            false
        }
    }

    /// Tables whose snapshot has finished
    pub fn completed_tables(&self) -> impl Iterator<Item = &TableId> {
        self.tables
            .iter()
            .filter(|(_, s)| matches!(s, TableSyncState::SnapshotComplete))
            .map(|(t, _)| t)
    }
}

/// Serializes the table map as a list, since JSON object keys must be strings
mod table_entries {
    use super::{TableId, TableSyncState};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        table: TableId,
        state: TableSyncState,
    }

    #[derive(Serialize)]
    struct EntryRef<'a> {
        table: &'a TableId,
        state: &'a TableSyncState,
    }

    pub fn serialize<S: Serializer>(
        tables: &BTreeMap<TableId, TableSyncState>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            tables
                .iter()
                .map(|(table, state)| EntryRef { table, state }),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TableId, TableSyncState>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.table, e.state)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos(s: &str) -> LogPosition {
        s.parse().unwrap()
    }

    #[test]
    fn test_absent_table_is_not_started() {
        let state = GlobalSyncState::fresh(pos("0/10"));
        assert_eq!(
            state.table_state(&TableId::new("public", "users")),
            TableSyncState::NotStarted
        );
    }

    #[test]
    fn test_advance_log_position_is_monotonic() {
        let mut state = GlobalSyncState::fresh(pos("0/100"));
        assert!(state.advance_log_position(pos("0/200")));
        assert!(!state.advance_log_position(pos("0/150")));
        assert!(!state.advance_log_position(pos("0/200")));
        assert_eq!(state.last_known_log_position, pos("0/200"));
    }

    #[test]
    fn test_needs_snapshot() {
        assert!(TableSyncState::NotStarted.needs_snapshot());
        assert!(TableSyncState::SnapshotInProgress(SnapshotProgress::new(
            PositionMarker::new(1, 1),
            None
        ))
        .needs_snapshot());
        assert!(TableSyncState::ExcludedThisRun {
            reason: "vacuum".to_string(),
            resume: None
        }
        .needs_snapshot());
        assert!(!TableSyncState::SnapshotComplete.needs_snapshot());
    }

    #[test]
    fn test_resume_progress_survives_exclusion() {
        let progress = SnapshotProgress::new(PositionMarker::new(4, 2), Some(16384));
        let excluded = TableSyncState::ExcludedThisRun {
            reason: "vacuum".to_string(),
            resume: Some(progress),
        };
        assert_eq!(excluded.resume_progress(), Some(progress));
        assert_eq!(TableSyncState::SnapshotComplete.resume_progress(), None);
    }

    #[test]
    fn test_state_serialization() {
        let mut state = GlobalSyncState::fresh(pos("0/16B3748"));
        state.set_table_state(
            TableId::new("public", "users"),
            TableSyncState::SnapshotComplete,
        );
        state.set_table_state(
            TableId::new("public", "orders"),
            TableSyncState::SnapshotInProgress(SnapshotProgress::new(
                PositionMarker::new(7, 3),
                Some(42),
            )),
        );

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_known_log_position"], "0/16B3748");
        // BTreeMap order: orders before users
        assert_eq!(json["tables"][0]["table"]["name"], "orders");
        assert_eq!(json["tables"][0]["state"]["status"], "snapshot_in_progress");
        assert_eq!(json["tables"][0]["state"]["marker"], "(7,3)");
        assert_eq!(json["tables"][1]["state"]["status"], "snapshot_complete");

        let restored: GlobalSyncState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_completed_tables() {
        let mut state = GlobalSyncState::fresh(LogPosition::ZERO);
        state.set_table_state(TableId::new("s", "a"), TableSyncState::SnapshotComplete);
        state.set_table_state(TableId::new("s", "b"), TableSyncState::NotStarted);
        let done: Vec<_> = state.completed_tables().collect();
        assert_eq!(done, vec![&TableId::new("s", "a")]);
    }
}
