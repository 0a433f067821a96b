//! Change log tail
//!
//! Wraps a [`ChangeFeedReader`] as a lazy [`Stage`]. The reader is opened
//! only when the stage is reached, changes for tables outside the run are
//! dropped, and checkpoints are forwarded only when they move forward.

use crate::error::{Error, Result, ResultExt};
use crate::position::LogPosition;
use crate::source::{ChangeCursor, ChangeEvent, ChangeFeedReader};
use crate::stream::{Stage, StageDescriptor, StageEvent};
use crate::types::{Record, TableId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const PHASE: &str = "log tail";

/// Reads changes after a position for a fixed set of tables
pub struct LogTailStage {
    reader: Arc<dyn ChangeFeedReader>,
    from: LogPosition,
    tables: Vec<TableId>,
    allowed: HashSet<TableId>,
    cursor: Option<Box<dyn ChangeCursor>>,
    last_checkpoint: LogPosition,
    skipped: usize,
}

impl LogTailStage {
    /// Create a stage reading changes strictly after `from`
    pub fn new(reader: Arc<dyn ChangeFeedReader>, from: LogPosition, tables: Vec<TableId>) -> Self {
        let allowed = tables.iter().cloned().collect();
        Self {
            reader,
            from,
            tables,
            allowed,
            cursor: None,
            last_checkpoint: from,
            skipped: 0,
        }
    }
}

#[async_trait]
impl Stage for LogTailStage {
    fn describe(&self) -> StageDescriptor {
        StageDescriptor::log_tail(self.tables.clone())
    }

    async fn open(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        debug!(
            "Opening log tail after {} for {} table(s)",
            self.from,
            self.tables.len()
        );
        let cursor = self
            .reader
            .open_feed(self.from, &self.tables)
            .await
            .in_phase(PHASE, None)?;
        self.cursor = Some(cursor);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StageEvent>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::invariant("log tail read before open"));
        };

        loop {
            match cursor.next_event().await.in_phase(PHASE, None)? {
                None => return Ok(None),
                Some(ChangeEvent::Change {
                    table,
                    position,
                    key,
                    data,
                }) => {
                    if position <= self.from || !self.allowed.contains(&table) {
                        self.skipped += 1;
                        continue;
                    }
                    let record = Record::log_tail(table, data, position).with_key(key);
                    return Ok(Some(StageEvent::Record {
                        record,
                        progress: None,
                    }));
                }
                Some(ChangeEvent::Checkpoint(position)) => {
                    if position > self.last_checkpoint {
                        self.last_checkpoint = position;
                        return Ok(Some(StageEvent::LogCheckpoint(position)));
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut cursor) = self.cursor.take() {
            debug!(
                "Closing log tail at {} ({} change(s) skipped)",
                self.last_checkpoint, self.skipped
            );
            cursor.close().await.in_phase(PHASE, None)?;
        }
        Ok(())
    }
}
