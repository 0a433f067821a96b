//! Stage composition module
//!
//! Runs stages strictly one after another and turns their events into output
//! messages, keeping the run's [`GlobalSyncState`] up to date.
//!
//! # Overview
//!
//! The stream module provides:
//! - `Stage` - Two-phase (open/next/close) record source
//! - `SyncStream` - Sequencer owning the sync state
//! - `MessageStream` - `futures::Stream` adapter over a `SyncStream`

mod adapter;
mod types;

pub use adapter::MessageStream;
pub use types::{Stage, StageDescriptor, StageEvent, StreamStats};

use crate::error::{Error, Result};
use crate::state::{GlobalSyncState, StateStore, SyncIdentity, TableSyncState};
use crate::types::{Message, SourceKind, TableId};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the state is handed back when the stream ends
struct Persistence {
    store: Arc<dyn StateStore>,
    identity: SyncIdentity,
}

/// Pull-driven sequence of stages.
///
/// Stage *n + 1* is opened only after stage *n* has been drained and closed.
/// The state is owned here; stages only emit events.
pub struct SyncStream {
    pending: VecDeque<Box<dyn Stage>>,
    active: Option<Box<dyn Stage>>,
    queued: VecDeque<Message>,
    state: GlobalSyncState,
    /// State carried by the last `State` message handed out
    delivered: GlobalSyncState,
    checkpoint_interval: usize,
    since_checkpoint: usize,
    /// Tables whose snapshot has not finished in this run
    snapshotting: HashSet<TableId>,
    persistence: Option<Persistence>,
    stats: StreamStats,
    finished: bool,
}

impl SyncStream {
    /// Create a stream over `stages`, starting from `state`
    pub fn new(stages: Vec<Box<dyn Stage>>, state: GlobalSyncState) -> Self {
        let snapshotting = stages
            .iter()
            .map(|s| s.describe())
            .filter(|d| d.kind == SourceKind::Snapshot)
            .flat_map(|d| d.tables)
            .collect();

        Self {
            pending: stages.into(),
            active: None,
            queued: VecDeque::new(),
            delivered: state.clone(),
            state,
            checkpoint_interval: crate::config::DEFAULT_STATE_CHECKPOINT_INTERVAL,
            since_checkpoint: 0,
            snapshotting,
            persistence: None,
            stats: StreamStats::default(),
            finished: false,
        }
    }

    /// Emit a state checkpoint every `interval` records
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Save the state to `store` when the stream ends or fails
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>, identity: SyncIdentity) -> Self {
        self.persistence = Some(Persistence { store, identity });
        self
    }

    /// Emit these messages before anything else
    #[must_use]
    pub fn with_leading_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.queued.extend(messages);
        self
    }

    /// Current state
    pub fn state(&self) -> &GlobalSyncState {
        &self.state
    }

    /// Consume the stream, returning its state
    pub fn into_state(self) -> GlobalSyncState {
        self.state
    }

    /// Counters so far
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Stages not yet started
    pub fn remaining_stages(&self) -> usize {
        self.pending.len() + usize::from(self.active.is_some())
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.finished && self.queued.is_empty()
    }

    /// Next message, `None` once every stage has drained.
    ///
    /// A final `State` message is emitted after the last stage closes. On
    /// error the active stage is closed and the state persisted before the
    /// error is returned.
    pub async fn next(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.queued.pop_front() {
                if let Message::State(state) = &message {
                    self.delivered = state.clone();
                }
                return Ok(Some(message));
            }
            if self.finished {
                return Ok(None);
            }

            if self.active.is_none() {
                let Some(mut stage) = self.pending.pop_front() else {
                    self.finish().await?;
                    continue;
                };
                debug!("Opening stage {}", stage.describe());
                if let Err(e) = stage.open().await {
                    close_quietly(stage.as_mut()).await;
                    return Err(self.abort(e).await);
                }
                self.stats.stages_opened += 1;
                self.active = Some(stage);
            }

            let Some(stage) = self.active.as_mut() else {
                continue;
            };
            let outcome = match stage.next().await {
                Ok(Some(event)) => self.apply(event),
                Ok(None) => self.close_active().await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                return Err(self.abort(e).await);
            }
        }
    }

    /// Close the active stage, drop the rest, and persist the state.
    ///
    /// Messages not yet handed out are discarded, so the saved state falls
    /// back to the last `State` message delivered.
    pub async fn close(&mut self) -> Result<()> {
        if self.finished {
            self.queued.clear();
            return Ok(());
        }
        self.finished = true;
        self.pending.clear();
        if !self.queued.is_empty() {
            debug!("Discarding {} undelivered message(s)", self.queued.len());
            self.queued.clear();
            self.state = self.delivered.clone();
        }
        let closed = match self.active.take() {
            Some(mut stage) => stage.close().await,
            None => Ok(()),
        };
        self.persist().await?;
        closed
    }

    /// Adapt into a `futures::Stream`.
    ///
    /// The state is persisted when the stream ends or fails. A consumer that
    /// stops early must call [`MessageStream::close`].
    pub fn into_message_stream(self) -> MessageStream {
        MessageStream::new(self)
    }

    fn apply(&mut self, event: StageEvent) -> Result<()> {
        match event {
            StageEvent::Record { record, progress } => {
                match record.kind {
                    SourceKind::Snapshot => {
                        self.stats.snapshot_records += 1;
                        if let Some(progress) = progress {
                            self.state.set_table_state(
                                record.table.clone(),
                                TableSyncState::SnapshotInProgress(progress),
                            );
                        }
                    }
                    SourceKind::LogTail => {
                        if self.snapshotting.contains(&record.table) {
                            return Err(Error::invariant(format!(
                                "log-tail record for {} before its snapshot completed",
                                record.table
                            )));
                        }
                        self.stats.log_records += 1;
                    }
                }
                self.queued.push_back(Message::Record(record));

                self.since_checkpoint += 1;
                if self.since_checkpoint >= self.checkpoint_interval {
                    self.checkpoint();
                }
            }
            StageEvent::SnapshotComplete(table) => {
                info!("Snapshot of {} complete", table);
                self.snapshotting.remove(&table);
                self.state
                    .set_table_state(table, TableSyncState::SnapshotComplete);
                self.stats.tables_completed += 1;
                self.checkpoint();
            }
            StageEvent::LogCheckpoint(position) => {
                if self.state.advance_log_position(position) {
                    debug!("Log position advanced to {}", position);
                    self.checkpoint();
                }
            }
        }
        Ok(())
    }

    fn checkpoint(&mut self) {
        self.since_checkpoint = 0;
        self.stats.state_messages += 1;
        self.queued.push_back(Message::State(self.state.clone()));
    }

    async fn close_active(&mut self) -> Result<()> {
        if let Some(mut stage) = self.active.take() {
            debug!("Closing stage {}", stage.describe());
            stage.close().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished = true;
        info!(
            "Stream finished: {} snapshot record(s), {} log record(s)",
            self.stats.snapshot_records, self.stats.log_records
        );
        self.persist().await?;
        self.checkpoint();
        Ok(())
    }

    /// Close everything and persist, returning the error to propagate
    async fn abort(&mut self, error: Error) -> Error {
        warn!("Stream failed: {}", error);
        self.finished = true;
        self.pending.clear();
        if let Some(mut stage) = self.active.take() {
            close_quietly(stage.as_mut()).await;
        }
        if let Err(e) = self.persist().await {
            warn!("Failed to persist state after error: {}", e);
        }
        error
    }

    async fn persist(&mut self) -> Result<()> {
        if let Some(p) = &self.persistence {
            p.store.save(&p.identity, &self.state).await?;
        }
        Ok(())
    }
}

async fn close_quietly(stage: &mut dyn Stage) {
    if let Err(e) = stage.close().await {
        warn!("Failed to close stage {}: {}", stage.describe(), e);
    }
}

impl std::fmt::Debug for SyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStream")
            .field("remaining_stages", &self.remaining_stages())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
