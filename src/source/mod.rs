//! Source collaborators
//!
//! Narrow async interfaces to the server (slot lookup, layout metadata,
//! maintenance status, scans, change log, retention) and an in-memory
//! implementation of all of them.

mod fixture;
mod types;

pub use fixture::{
    FixtureChange, FixtureDefinition, FixtureFailures, FixtureSlot, FixtureSource, FixtureTable,
};
pub use types::{
    ChangeCursor, ChangeEvent, ChangeFeedReader, LayoutProvider, LogServer, MaintenanceChecker,
    ReplicationSlotInfo, RetentionCommitter, ScanCursor, ScanRequest, ScannedRow,
    SnapshotScanner, SourceCollaborators, TableLayout,
};
