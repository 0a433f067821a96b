//! Configuration types for a CDC sync
//!
//! Loaded from YAML or JSON (YAML is a superset, so one parser covers both).

use crate::error::{Error, Result};
use crate::types::TableId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default chunk size for positional scans (1 GiB)
pub const DEFAULT_CHUNK_TARGET_BYTES: u64 = 1024 * 1024 * 1024;

/// Default number of snapshot records between state checkpoints
pub const DEFAULT_STATE_CHECKPOINT_INTERVAL: usize = 10_000;

// ============================================================================
// Policies
// ============================================================================

/// What to do when the saved log checkpoint is no longer retained by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCursorPolicy {
    /// Fail the sync with an actionable error
    #[default]
    Fail,
    /// Warn and re-snapshot every table
    #[serde(alias = "re_sync")]
    Degrade,
}

/// When the server-side retention pointer is advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LsnCommitBehaviour {
    /// The log reader acknowledges positions as it reads them
    WhileReadingData,
    /// The previous run's checkpoint is acknowledged at the start of the next run
    #[default]
    AfterLoadingData,
}

// ============================================================================
// CDC Config
// ============================================================================

/// Configuration for one hybrid snapshot + log-tail sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    /// Identity of the connection; keys persisted state
    pub connection_id: String,

    /// Replication slot name
    pub replication_slot: String,

    /// Publication name
    pub publication: String,

    /// Logical decoding plugin
    #[serde(default = "default_plugin")]
    pub plugin: String,

    /// Tables to sync (`namespace.name`)
    #[serde(default)]
    pub tables: Vec<String>,

    /// Handling of a checkpoint older than the retention window
    #[serde(default)]
    pub invalid_cursor_policy: InvalidCursorPolicy,

    /// When to acknowledge log positions to the server
    #[serde(default)]
    pub lsn_commit_behaviour: LsnCommitBehaviour,

    /// Diagnostic run: never advance server-side retention
    #[serde(default, alias = "debug_mode")]
    pub dry_run: bool,

    /// Target size of a single positional scan chunk in bytes
    #[serde(default = "default_chunk_target_bytes")]
    pub chunk_target_bytes: u64,

    /// Snapshot records between state checkpoints
    #[serde(default = "default_state_checkpoint_interval")]
    pub state_checkpoint_interval: usize,
}

fn default_plugin() -> String {
    "pgoutput".to_string()
}

fn default_chunk_target_bytes() -> u64 {
    DEFAULT_CHUNK_TARGET_BYTES
}

fn default_state_checkpoint_interval() -> usize {
    DEFAULT_STATE_CHECKPOINT_INTERVAL
}

impl CdcConfig {
    /// Create a config with defaults for everything but identity
    pub fn new(
        connection_id: impl Into<String>,
        replication_slot: impl Into<String>,
        publication: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            replication_slot: replication_slot.into(),
            publication: publication.into(),
            plugin: default_plugin(),
            tables: Vec::new(),
            invalid_cursor_policy: InvalidCursorPolicy::default(),
            lsn_commit_behaviour: LsnCommitBehaviour::default(),
            dry_run: false,
            chunk_target_bytes: DEFAULT_CHUNK_TARGET_BYTES,
            state_checkpoint_interval: DEFAULT_STATE_CHECKPOINT_INTERVAL,
        }
    }

    /// Load from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_str(&content)
    }

    /// Parse from a YAML or JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set requested tables
    #[must_use]
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Set invalid cursor policy
    #[must_use]
    pub fn with_invalid_cursor_policy(mut self, policy: InvalidCursorPolicy) -> Self {
        self.invalid_cursor_policy = policy;
        self
    }

    /// Set commit behaviour
    #[must_use]
    pub fn with_lsn_commit_behaviour(mut self, behaviour: LsnCommitBehaviour) -> Self {
        self.lsn_commit_behaviour = behaviour;
        self
    }

    /// Set dry-run mode
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set chunk target size
    #[must_use]
    pub fn with_chunk_target_bytes(mut self, bytes: u64) -> Self {
        self.chunk_target_bytes = bytes;
        self
    }

    /// Set state checkpoint interval
    #[must_use]
    pub fn with_state_checkpoint_interval(mut self, interval: usize) -> Self {
        self.state_checkpoint_interval = interval;
        self
    }

    /// Whether the previous checkpoint is acknowledged at run start
    pub fn should_flush_after_sync(&self) -> bool {
        self.lsn_commit_behaviour == LsnCommitBehaviour::AfterLoadingData
    }

    /// Parsed requested tables, in configured order, without duplicates
    pub fn requested_tables(&self) -> Result<Vec<TableId>> {
        let mut tables: Vec<TableId> = Vec::with_capacity(self.tables.len());
        for raw in &self.tables {
            let table: TableId = raw.parse()?;
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("connection_id", &self.connection_id),
            ("replication_slot", &self.replication_slot),
            ("publication", &self.publication),
            ("plugin", &self.plugin),
        ] {
            if value.trim().is_empty() {
                return Err(Error::missing_field(field));
            }
        }

        if self.chunk_target_bytes == 0 {
            return Err(Error::invalid_value(
                "chunk_target_bytes",
                "must be greater than zero",
            ));
        }

        if self.state_checkpoint_interval == 0 {
            return Err(Error::invalid_value(
                "state_checkpoint_interval",
                "must be greater than zero",
            ));
        }

        if self.dry_run && !self.should_flush_after_sync() {
            return Err(Error::config(
                "The config indicates that the log is acknowledged while reading data. This \
                 would mutate the log associated with the source being debugged and is not \
                 advised. Use lsn_commit_behaviour: after_loading_data with dry_run.",
            ));
        }

        self.requested_tables()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let yaml = r#"
connection_id: conn-1
replication_slot: airbyte_slot
publication: airbyte_pub
tables: [public.users, orders]
"#;
        let config = CdcConfig::from_str(yaml).unwrap();
        assert_eq!(config.plugin, "pgoutput");
        assert_eq!(config.invalid_cursor_policy, InvalidCursorPolicy::Fail);
        assert_eq!(
            config.lsn_commit_behaviour,
            LsnCommitBehaviour::AfterLoadingData
        );
        assert!(!config.dry_run);
        assert_eq!(config.chunk_target_bytes, DEFAULT_CHUNK_TARGET_BYTES);
        assert_eq!(
            config.requested_tables().unwrap(),
            vec![
                TableId::new("public", "users"),
                TableId::new("public", "orders")
            ]
        );
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "connection_id": "c",
            "replication_slot": "s",
            "publication": "p",
            "invalid_cursor_policy": "degrade",
            "debug_mode": true
        }"#;
        let config = CdcConfig::from_str(json).unwrap();
        assert_eq!(config.invalid_cursor_policy, InvalidCursorPolicy::Degrade);
        assert!(config.dry_run);
    }

    #[test]
    fn test_invalid_policy_value_rejected() {
        let yaml = r#"
connection_id: c
replication_slot: s
publication: p
invalid_cursor_policy: sometimes
"#;
        assert!(CdcConfig::from_str(yaml).is_err());
    }

    #[test]
    fn test_dry_run_while_reading_is_config_error() {
        let config = CdcConfig::new("c", "s", "p")
            .with_dry_run(true)
            .with_lsn_commit_behaviour(LsnCommitBehaviour::WhileReadingData);
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("not advised"));
    }

    #[test]
    fn test_missing_slot_rejected() {
        let config = CdcConfig::new("c", "", "p");
        assert!(matches!(
            config.validate(),
            Err(Error::MissingConfigField { ref field }) if field == "replication_slot"
        ));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = CdcConfig::new("c", "s", "p").with_chunk_target_bytes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_requested_tables_dedup() {
        let config = CdcConfig::new("c", "s", "p").with_tables(["a.t", "a.t", "b.t"]);
        assert_eq!(config.requested_tables().unwrap().len(), 2);
    }
}
