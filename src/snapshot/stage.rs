//! Positional scan stage for one table

use crate::error::{Error, Result, ResultExt};
use crate::position::{LogPosition, PositionMarker};
use crate::source::{ScanCursor, ScanRequest, SnapshotScanner};
use crate::state::SnapshotProgress;
use crate::stream::{Stage, StageDescriptor, StageEvent};
use crate::types::Record;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const PHASE: &str = "snapshot scan";

/// Reads one table's chunks through a [`SnapshotScanner`]
pub struct SnapshotStage {
    scanner: Arc<dyn SnapshotScanner>,
    request: ScanRequest,
    /// Position every snapshot record is stamped with
    start_position: LogPosition,
    cursor: Option<Box<dyn ScanCursor>>,
    last_marker: Option<PositionMarker>,
    drained: bool,
}

impl SnapshotStage {
    /// Create a stage; nothing is opened until [`Stage::open`]
    pub fn new(
        scanner: Arc<dyn SnapshotScanner>,
        request: ScanRequest,
        start_position: LogPosition,
    ) -> Self {
        let last_marker = request.resume_after;
        Self {
            scanner,
            request,
            start_position,
            cursor: None,
            last_marker,
            drained: false,
        }
    }

    fn check_order(&mut self, marker: PositionMarker) -> Result<()> {
        if let Some(last) = self.last_marker {
            if marker <= last {
                return Err(Error::invariant(format!(
                    "scan of {} went backwards: {} after {}",
                    self.request.table, marker, last
                )));
            }
        }
        self.last_marker = Some(marker);
        Ok(())
    }
}

#[async_trait]
impl Stage for SnapshotStage {
    fn describe(&self) -> StageDescriptor {
        StageDescriptor::snapshot(self.request.table.clone())
    }

    async fn open(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        debug!(
            "Opening scan of {} over {} chunk(s)",
            self.request.table,
            self.request.chunks.len()
        );
        let cursor = self
            .scanner
            .open_scan(&self.request)
            .await
            .in_phase(PHASE, Some(&self.request.table))?;
        self.cursor = Some(cursor);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StageEvent>> {
        if self.drained {
            return Ok(None);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::invariant(format!(
                "scan of {} read before open",
                self.request.table
            )));
        };

        let row = cursor
            .next_row()
            .await
            .in_phase(PHASE, Some(&self.request.table))?;

        match row {
            Some(row) => {
                self.check_order(row.marker)?;
                let record = Record::snapshot(self.request.table.clone(), row.data)
                    .with_key(row.key)
                    .with_log_position(self.start_position);
                Ok(Some(StageEvent::Record {
                    record,
                    progress: Some(SnapshotProgress::new(
                        row.marker,
                        self.request.layout.file_node,
                    )),
                }))
            }
            None => {
                self.drained = true;
                Ok(Some(StageEvent::SnapshotComplete(self.request.table.clone())))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut cursor) = self.cursor.take() {
            debug!("Closing scan of {}", self.request.table);
            cursor
                .close()
                .await
                .in_phase(PHASE, Some(&self.request.table))?;
        }
        Ok(())
    }
}
