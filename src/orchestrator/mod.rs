//! Sync orchestration module
//!
//! Drives one run through its phases:
//!
//! ```text
//! Init -> Validated -> Classified -> Scanning -> HandoffDecision -> TailingLog | SnapshotOnly -> Done
//! ```
//!
//! Validation, classification and eligibility happen once, up front. The
//! returned [`SyncStream`] then opens each stage lazily as it is reached.

mod types;

pub use types::{CheckReport, Handoff, Phase, SyncOutput, SyncPlan};

use crate::changefeed::LogTailStage;
use crate::classify::{StreamClassifier, StreamPartition};
use crate::config::CdcConfig;
use crate::eligibility::{Eligibility, EligibilityGuard};
use crate::error::{Error, Result, ResultExt};
use crate::position::LogPosition;
use crate::retention::{Resolution, RetentionValidator, ValidationResult};
use crate::snapshot::{ChunkPlan, SnapshotStage};
use crate::source::{ScanRequest, SourceCollaborators};
use crate::state::{GlobalSyncState, StateStore, SyncIdentity, TableSyncState};
use crate::stream::{Stage, StageDescriptor, SyncStream};
use crate::types::{Message, TableId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything decided before any side effect
struct Prepared {
    requested: Vec<TableId>,
    validation: ValidationResult,
    resolution: Resolution,
    state: GlobalSyncState,
    partition: StreamPartition,
    eligibility: Eligibility,
    start_position: LogPosition,
    handoff: Handoff,
    phases: Vec<Phase>,
}

impl Prepared {
    fn enter(&mut self, phase: Phase) {
        let from = self.phases.last().copied().unwrap_or(Phase::Init);
        info!("Phase {} -> {}", from, phase);
        self.phases.push(phase);
    }

    /// Requested tables that the log tail covers
    fn log_tables(&self) -> Vec<TableId> {
        let excluded: HashSet<&TableId> = self.eligibility.excluded_tables().collect();
        self.requested
            .iter()
            .filter(|t| !excluded.contains(t))
            .cloned()
            .collect()
    }

    fn stage_descriptors(&self) -> Vec<StageDescriptor> {
        let mut stages: Vec<StageDescriptor> = self
            .eligibility
            .eligible
            .iter()
            .cloned()
            .map(StageDescriptor::snapshot)
            .collect();
        if self.handoff.tails_log() {
            stages.push(StageDescriptor::log_tail(self.log_tables()));
        }
        stages
    }

    fn plan(&self, committed: Option<LogPosition>) -> SyncPlan {
        SyncPlan {
            handoff: self.handoff,
            stages: self.stage_descriptors(),
            snapshot_tables: self.eligibility.eligible.clone(),
            log_only_tables: self.partition.log_only.clone(),
            excluded: self.eligibility.excluded.clone(),
            still_valid: self.validation.still_valid,
            resolution: self.resolution,
            start_position: self.start_position,
            log_start: self.state.last_known_log_position,
            committed,
            phases: self.phases.clone(),
        }
    }

    fn leading_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let (Resolution::Resnapshot, Some(saved)) = (self.resolution, self.validation.saved) {
            messages.push(Message::warn(format!(
                "Saved position {} is no longer retained (confirmed {}); re-syncing all tables",
                saved, self.validation.confirmed
            )));
        }
        if self.eligibility.has_exclusions() {
            let skipped: Vec<String> = self
                .eligibility
                .excluded_tables()
                .map(ToString::to_string)
                .collect();
            let message = if self.handoff.tails_log() {
                format!("Snapshot postponed for {}", skipped.join(", "))
            } else {
                format!(
                    "Skipping log tail this run; snapshot postponed for {}",
                    skipped.join(", ")
                )
            };
            messages.push(Message::warn(message));
        }
        messages
    }
}

/// Runs one hybrid snapshot + log-tail sync
pub struct Orchestrator {
    config: CdcConfig,
    source: SourceCollaborators,
    store: Arc<dyn StateStore>,
    validator: RetentionValidator,
    classifier: StreamClassifier,
    guard: EligibilityGuard,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(config: CdcConfig, source: SourceCollaborators, store: Arc<dyn StateStore>) -> Self {
        Self {
            config,
            source,
            store,
            validator: RetentionValidator::new(),
            classifier: StreamClassifier::new(),
            guard: EligibilityGuard::new(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CdcConfig {
        &self.config
    }

    /// Key under which state is stored
    pub fn identity(&self) -> SyncIdentity {
        SyncIdentity::new(&self.config.connection_id, &self.config.replication_slot)
    }

    /// Check the configuration, the slot and the saved checkpoint
    pub async fn check(&self) -> Result<CheckReport> {
        self.config.validate()?;
        let tables = self.config.requested_tables()?;
        let saved = self.store.load(&self.identity()).await?;
        let slot = self
            .source
            .log_server
            .slot_info(&self.config.replication_slot)
            .await
            .in_phase("slot lookup", None)?;

        let saved_position = saved.map(|s| s.last_known_log_position);
        let validation = self.validator.validate(saved_position, &slot)?;
        let message = match self
            .validator
            .resolve(&validation, self.config.invalid_cursor_policy)
        {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        Ok(CheckReport {
            success: message.is_none(),
            slot: slot.slot_name,
            confirmed_flushed: slot.confirmed_flushed,
            saved_position,
            still_valid: validation.still_valid,
            tables,
            message,
        })
    }

    /// Decide what a run would do, without side effects
    pub async fn plan(&self) -> Result<SyncPlan> {
        let prepared = self.prepare().await?;
        Ok(prepared.plan(None))
    }

    /// Start a run.
    ///
    /// Commits the previous checkpoint when due, records skipped tables,
    /// advances the server log, and returns the lazy stream. No scan or log
    /// reader is opened here.
    pub async fn run(&self) -> Result<SyncOutput> {
        let mut prepared = self.prepare().await?;

        let committed = self
            .validator
            .commit(&prepared.validation, &self.config, self.source.committer.as_ref())
            .await?;

        self.record_exclusions(&mut prepared);

        let mut stages: Vec<Box<dyn Stage>> = self.snapshot_stages(&mut prepared).await?;

        self.source
            .log_server
            .advance_position()
            .await
            .in_phase("log advance", None)?;

        prepared.enter(Phase::Scanning);
        prepared.enter(Phase::HandoffDecision);
        info!("Handoff: {}", prepared.handoff);
        if prepared.handoff.tails_log() {
            stages.push(Box::new(LogTailStage::new(
                Arc::clone(&self.source.change_feed),
                prepared.state.last_known_log_position,
                prepared.log_tables(),
            )));
            prepared.enter(Phase::TailingLog);
        } else {
            prepared.enter(Phase::SnapshotOnly);
        }
        prepared.enter(Phase::Done);

        let plan = prepared.plan(committed);
        let stream = SyncStream::new(stages, prepared.state.clone())
            .with_checkpoint_interval(self.config.state_checkpoint_interval)
            .with_store(Arc::clone(&self.store), self.identity())
            .with_leading_messages(prepared.leading_messages());

        Ok(SyncOutput { plan, stream })
    }

    async fn prepare(&self) -> Result<Prepared> {
        self.config.validate()?;
        let requested = self.config.requested_tables()?;
        if requested.is_empty() {
            return Err(Error::missing_field("tables"));
        }

        let saved = self.store.load(&self.identity()).await?;
        let slot = self
            .source
            .log_server
            .slot_info(&self.config.replication_slot)
            .await
            .in_phase("slot lookup", None)?;
        let start_position = self
            .source
            .log_server
            .current_position()
            .await
            .in_phase("log position lookup", None)?;

        let validation = self
            .validator
            .validate(saved.as_ref().map(|s| s.last_known_log_position), &slot)?;
        let resolution = self
            .validator
            .resolve(&validation, self.config.invalid_cursor_policy)?;

        let state = match (resolution, saved) {
            (Resolution::Resume, Some(saved)) => saved,
            _ => GlobalSyncState::fresh(start_position),
        };

        let partition = self
            .classifier
            .classify(&requested, &state, validation.still_valid);
        debug!(
            "{} table(s) to scan, {} log-only",
            partition.snapshot.len(),
            partition.log_only.len()
        );

        let eligibility = self
            .guard
            .filter(&partition.snapshot, self.source.maintenance.as_ref())
            .await?;
        check_partition(&partition, &eligibility)?;

        let handoff = decide_handoff(&partition, &eligibility);

        let mut prepared = Prepared {
            requested,
            validation,
            resolution,
            state,
            partition,
            eligibility,
            start_position,
            handoff,
            phases: vec![Phase::Init],
        };
        prepared.enter(Phase::Validated);
        prepared.enter(Phase::Classified);
        Ok(prepared)
    }

    /// Mark skipped tables, keeping any progress so they resume next run.
    ///
    /// Progress is dropped when the log tail runs anyway: the checkpoint moves
    /// past changes to rows the partial scan already covered.
    fn record_exclusions(&self, prepared: &mut Prepared) {
        let tails_log = prepared.handoff.tails_log();
        for verdict in &prepared.eligibility.excluded {
            let mut resume = prepared.state.table_state(&verdict.table).resume_progress();
            if tails_log && resume.is_some() {
                warn!(
                    "{} is skipped while the log tail runs; its snapshot will restart",
                    verdict.table
                );
                resume = None;
            }
            prepared.state.set_table_state(
                verdict.table.clone(),
                TableSyncState::ExcludedThisRun {
                    reason: verdict.reason.clone().unwrap_or_default(),
                    resume,
                },
            );
        }

        for table in &prepared.eligibility.eligible {
            if let TableSyncState::ExcludedThisRun { resume, .. } =
                prepared.state.table_state(table)
            {
                let restored = match resume {
                    Some(progress) => TableSyncState::SnapshotInProgress(progress),
                    None => TableSyncState::NotStarted,
                };
                prepared.state.set_table_state(table.clone(), restored);
            }
        }
    }

    async fn snapshot_stages(&self, prepared: &mut Prepared) -> Result<Vec<Box<dyn Stage>>> {
        let eligible = prepared.eligibility.eligible.clone();
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let layouts = self
            .source
            .layouts
            .layouts(&eligible)
            .await
            .in_phase("layout lookup", None)?;
        let chunk_plan = ChunkPlan::new(self.config.chunk_target_bytes);

        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(eligible.len());
        for table in eligible {
            let layout = *layouts.get(&table).ok_or_else(|| {
                Error::transient(
                    "layout lookup",
                    Some(table.to_string()),
                    "no layout reported",
                )
            })?;

            let mut resume = prepared.state.table_state(&table).resume_progress();
            if let Some(progress) = resume {
                if progress.file_node.is_some()
                    && layout.file_node.is_some()
                    && progress.file_node != layout.file_node
                {
                    warn!(
                        "File node of {} changed ({:?} -> {:?}); restarting its snapshot",
                        table, progress.file_node, layout.file_node
                    );
                    prepared
                        .state
                        .set_table_state(table.clone(), TableSyncState::NotStarted);
                    resume = None;
                }
            }

            let resume_after = resume.map(|p| p.marker);
            let chunks = chunk_plan.for_layout(&layout, resume_after)?;
            debug!(
                "Planned {} chunk(s) for {} resuming after {:?}",
                chunks.len(),
                table,
                resume_after
            );

            stages.push(Box::new(SnapshotStage::new(
                Arc::clone(&self.source.scanner),
                ScanRequest {
                    table,
                    layout,
                    chunks,
                    resume_after,
                },
                prepared.start_position,
            )));
        }
        Ok(stages)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// How the run ends after scanning.
///
/// Exclusions suppress the log tail only when something is actually scanned
/// this run. When every pending scan is excluded, the caught-up tables keep
/// tailing the log; with none of those either, nothing runs.
fn decide_handoff(partition: &StreamPartition, eligibility: &Eligibility) -> Handoff {
    if partition.is_log_only() {
        Handoff::LogOnly
    } else if !eligibility.has_exclusions() {
        Handoff::SnapshotThenLog
    } else if eligibility.eligible.is_empty() && !partition.log_only.is_empty() {
        Handoff::LogOnly
    } else {
        Handoff::SnapshotOnly
    }
}

/// Eligible and excluded tables must exactly cover the snapshot set
fn check_partition(partition: &StreamPartition, eligibility: &Eligibility) -> Result<()> {
    let covered: HashSet<&TableId> = eligibility
        .eligible
        .iter()
        .chain(eligibility.excluded_tables())
        .collect();
    let expected: HashSet<&TableId> = partition.snapshot.iter().collect();

    if covered != expected
        || eligibility.eligible.len() + eligibility.excluded.len() != partition.snapshot.len()
    {
        return Err(Error::invariant(format!(
            "eligibility split {} eligible + {} excluded does not match {} snapshot table(s)",
            eligibility.eligible.len(),
            eligibility.excluded.len(),
            partition.snapshot.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
