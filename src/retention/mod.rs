//! Retention window validation
//!
//! Decides whether a saved log position is still inside the server's
//! retention window, what to do when it is not, and when the server may be
//! told to release log up to that position.

use crate::config::{CdcConfig, InvalidCursorPolicy};
use crate::error::{Error, Result, ResultExt};
use crate::position::LogPosition;
use crate::source::{ReplicationSlotInfo, RetentionCommitter};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of checking a saved position against the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Whether the saved position can be resumed from
    pub still_valid: bool,
    /// Position from the previous run, if any
    pub saved: Option<LogPosition>,
    /// Oldest position the server retains
    pub confirmed: LogPosition,
}

impl ValidationResult {
    /// Whether this is the first run for the slot
    pub fn is_first_run(&self) -> bool {
        self.saved.is_none()
    }
}

/// What the run does after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Resume from the saved state
    Resume,
    /// Discard the saved state and re-snapshot every table
    Resnapshot,
}

/// Checks and commits retention positions for one slot
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionValidator;

impl RetentionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Compare the saved position with the slot's confirmed position.
    ///
    /// The slot must exist and be unique.
    pub fn validate(
        &self,
        saved: Option<LogPosition>,
        slot: &ReplicationSlotInfo,
    ) -> Result<ValidationResult> {
        if !slot.exists || slot.slot_count != 1 {
            return Err(Error::config(format!(
                "Expected exactly one replication slot named '{}' but found {}",
                slot.slot_name, slot.slot_count
            )));
        }

        let still_valid = saved.is_some_and(|saved| saved >= slot.confirmed_flushed);
        debug!(
            "Saved position {} vs confirmed {}: valid = {}",
            saved.map_or_else(|| "<none>".to_string(), |p| p.to_string()),
            slot.confirmed_flushed,
            still_valid
        );

        Ok(ValidationResult {
            still_valid,
            saved,
            confirmed: slot.confirmed_flushed,
        })
    }

    /// Apply the invalid-cursor policy
    pub fn resolve(
        &self,
        result: &ValidationResult,
        policy: InvalidCursorPolicy,
    ) -> Result<Resolution> {
        if result.still_valid {
            return Ok(Resolution::Resume);
        }
        let Some(saved) = result.saved else {
            info!("No saved state; starting with a full snapshot");
            return Ok(Resolution::Resnapshot);
        };

        match policy {
            InvalidCursorPolicy::Fail => Err(Error::RetentionViolation {
                saved: saved.to_string(),
                confirmed: result.confirmed.to_string(),
            }),
            InvalidCursorPolicy::Degrade => {
                warn!(
                    "Saved position {} is before confirmed position {}; re-syncing all tables",
                    saved, result.confirmed
                );
                Ok(Resolution::Resnapshot)
            }
        }
    }

    /// Whether a commit should happen for this run
    pub fn should_commit(&self, result: &ValidationResult, config: &CdcConfig) -> bool {
        result.still_valid && !config.dry_run && config.should_flush_after_sync()
    }

    /// Tell the server it may release log up to the saved position.
    ///
    /// Returns the committed position, or `None` if no commit was due.
    pub async fn commit(
        &self,
        result: &ValidationResult,
        config: &CdcConfig,
        committer: &dyn RetentionCommitter,
    ) -> Result<Option<LogPosition>> {
        if !self.should_commit(result, config) {
            debug!("Skipping retention commit");
            return Ok(None);
        }
        let Some(target) = result.saved else {
            return Ok(None);
        };
        if target < result.confirmed {
            return Err(Error::invariant(format!(
                "commit target {} is behind confirmed position {}",
                target, result.confirmed
            )));
        }

        info!(
            "Committing position {} for slot {}",
            target, config.replication_slot
        );
        committer
            .commit(
                target,
                &config.replication_slot,
                &config.publication,
                &config.plugin,
            )
            .await
            .in_phase("retention commit", None)?;
        Ok(Some(target))
    }
}
