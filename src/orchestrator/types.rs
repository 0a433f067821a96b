//! Orchestrator types

use crate::eligibility::EligibilityVerdict;
use crate::position::LogPosition;
use crate::retention::Resolution;
use crate::stream::{StageDescriptor, SyncStream};
use crate::types::TableId;
use serde::Serialize;
use std::fmt;

/// Phases of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Validated,
    Classified,
    Scanning,
    HandoffDecision,
    TailingLog,
    SnapshotOnly,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Validated => "validated",
            Self::Classified => "classified",
            Self::Scanning => "scanning",
            Self::HandoffDecision => "handoff_decision",
            Self::TailingLog => "tailing_log",
            Self::SnapshotOnly => "snapshot_only",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// How the run ends after scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Handoff {
    /// Nothing to scan; only the log tail runs
    LogOnly,
    /// Scan, then tail the log for every requested table
    SnapshotThenLog,
    /// Scan only; some tables were skipped so the log tail is suppressed
    SnapshotOnly,
}

impl Handoff {
    /// Whether a log-tail stage runs
    pub fn tails_log(&self) -> bool {
        !matches!(self, Self::SnapshotOnly)
    }
}

impl fmt::Display for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogOnly => write!(f, "log_only"),
            Self::SnapshotThenLog => write!(f, "snapshot_then_log"),
            Self::SnapshotOnly => write!(f, "snapshot_only"),
        }
    }
}

/// Decisions made for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub handoff: Handoff,
    /// Stages in execution order
    pub stages: Vec<StageDescriptor>,
    /// Tables that will be scanned
    pub snapshot_tables: Vec<TableId>,
    /// Tables read from the log only
    pub log_only_tables: Vec<TableId>,
    /// Tables skipped this run
    pub excluded: Vec<EligibilityVerdict>,
    /// Whether the saved checkpoint was inside the retention window
    pub still_valid: bool,
    pub resolution: Resolution,
    /// Log position when the run started; stamps snapshot records
    pub start_position: LogPosition,
    /// Position the log tail reads after
    pub log_start: LogPosition,
    /// Position acknowledged to the server, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<LogPosition>,
    /// Phases visited while planning
    pub phases: Vec<Phase>,
}

/// A planned run and the stream that performs it
#[derive(Debug)]
pub struct SyncOutput {
    pub plan: SyncPlan,
    pub stream: SyncStream,
}

/// Result of a connectivity and checkpoint check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub success: bool,
    pub slot: String,
    pub confirmed_flushed: LogPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_position: Option<LogPosition>,
    pub still_valid: bool,
    pub tables: Vec<TableId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
