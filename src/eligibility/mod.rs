//! Snapshot eligibility
//!
//! Removes tables from the snapshot set when a positional scan would not be
//! safe, currently tables the server reports as under maintenance (a vacuum
//! can move rows between pages mid-scan).

use crate::error::{Result, ResultExt};
use crate::source::MaintenanceChecker;
use crate::types::TableId;
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Reason recorded for tables under maintenance
pub const UNDER_MAINTENANCE: &str = "table is under maintenance (vacuum in progress)";

/// Whether one table may be scanned this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibilityVerdict {
    pub table: TableId,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EligibilityVerdict {
    /// Table may be scanned
    pub fn eligible(table: TableId) -> Self {
        Self {
            table,
            eligible: true,
            reason: None,
        }
    }

    /// Table must be skipped
    pub fn excluded(table: TableId, reason: impl Into<String>) -> Self {
        Self {
            table,
            eligible: false,
            reason: Some(reason.into()),
        }
    }
}

/// Snapshot set after filtering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    /// Tables to scan, in original order
    pub eligible: Vec<TableId>,
    /// Verdicts for skipped tables, in original order
    pub excluded: Vec<EligibilityVerdict>,
}

impl Eligibility {
    /// Whether any table was skipped
    pub fn has_exclusions(&self) -> bool {
        !self.excluded.is_empty()
    }

    /// Skipped table ids
    pub fn excluded_tables(&self) -> impl Iterator<Item = &TableId> {
        self.excluded.iter().map(|v| &v.table)
    }
}

/// Filters a snapshot set through a [`MaintenanceChecker`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityGuard;

impl EligibilityGuard {
    pub fn new() -> Self {
        Self
    }

    /// Split `snapshot` into eligible and excluded tables.
    ///
    /// The checker is not consulted for an empty set.
    pub async fn filter(
        &self,
        snapshot: &[TableId],
        checker: &dyn MaintenanceChecker,
    ) -> Result<Eligibility> {
        if snapshot.is_empty() {
            return Ok(Eligibility::default());
        }

        let busy: HashSet<TableId> = checker
            .tables_under_maintenance(snapshot)
            .await
            .in_phase("maintenance check", None)?
            .into_iter()
            .collect();

        let mut eligibility = Eligibility::default();
        for table in snapshot {
            if busy.contains(table) {
                warn!("Skipping snapshot of {}: {}", table, UNDER_MAINTENANCE);
                eligibility
                    .excluded
                    .push(EligibilityVerdict::excluded(table.clone(), UNDER_MAINTENANCE));
            } else {
                eligibility.eligible.push(table.clone());
            }
        }
        Ok(eligibility)
    }
}
