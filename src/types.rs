//! Common types used throughout Solidafy CDC
//!
//! This module contains shared type definitions, type aliases,
//! and the message envelope emitted by a sync run.

use crate::position::LogPosition;
use crate::state::GlobalSyncState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

// ============================================================================
// Table Identity
// ============================================================================

/// Stable identity of a table within a sync
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    /// Schema / namespace
    pub namespace: String,
    /// Table name
    pub name: String,
}

impl TableId {
    /// Create a new table id
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for TableId {
    type Err = crate::error::Error;

    /// Parses `namespace.name`; a bare name lands in the `public` namespace
    fn from_str(s: &str) -> crate::error::Result<Self> {
        let s = s.trim();
        match s.split_once('.') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            None if !s.is_empty() => Ok(Self::new("public", s)),
            _ => Err(crate::error::Error::invalid_value(
                "tables",
                format!("'{s}' is not a valid table name"),
            )),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Positional scan of current table contents
    Snapshot,
    /// Change event read from the log
    LogTail,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::LogTail => f.write_str("log_tail"),
        }
    }
}

/// A record flowing out of the scanner or the log reader.
///
/// The payload is opaque; only the table and source tags are inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Originating table
    pub table: TableId,
    /// Snapshot or log tail
    pub kind: SourceKind,
    /// Record key, if the source provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<JsonValue>,
    /// Record attributes
    pub data: JsonValue,
    /// Log position associated with the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_position: Option<LogPosition>,
    /// Timestamp when the record was emitted
    pub emitted_at: DateTime<Utc>,
}

impl Record {
    /// Create a snapshot record
    pub fn snapshot(table: TableId, data: JsonValue) -> Self {
        Self {
            table,
            kind: SourceKind::Snapshot,
            key: None,
            data,
            log_position: None,
            emitted_at: Utc::now(),
        }
    }

    /// Create a log-tail record
    pub fn log_tail(table: TableId, data: JsonValue, position: LogPosition) -> Self {
        Self {
            table,
            kind: SourceKind::LogTail,
            key: None,
            data,
            log_position: Some(position),
            emitted_at: Utc::now(),
        }
    }

    /// Attach a key
    #[must_use]
    pub fn with_key(mut self, key: Option<JsonValue>) -> Self {
        self.key = key;
        self
    }

    /// Attach a log position
    #[must_use]
    pub fn with_log_position(mut self, position: LogPosition) -> Self {
        self.log_position = Some(position);
        self
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Log level for sync messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Messages emitted during a sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// A single record
    Record(Record),

    /// State checkpoint
    State(GlobalSyncState),

    /// Log message
    Log {
        /// Log level
        level: LogLevel,
        /// Log message
        message: String,
    },
}

impl Message {
    /// Create a log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    /// Create an info log message
    pub fn info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Create a warning log message
    pub fn warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    /// Get the record, if this is a record message
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Check if this is a log message
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log { .. })
    }
}
