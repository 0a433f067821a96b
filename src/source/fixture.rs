//! In-memory source
//!
//! Implements every collaborator trait over a static definition loaded from
//! YAML or JSON. Used by the CLI for offline runs and by the test suite.
//!
//! ```yaml
//! slot:
//!   name: airbyte_slot
//!   confirmed_flushed: "0/100"
//! current_position: "0/200"
//! tables:
//!   - table: public.users
//!     rows_per_page: 2
//!     rows: [{id: 1}, {id: 2}, {id: 3}]
//! changes:
//!   - table: public.users
//!     position: "0/210"
//!     data: {id: 1, op: u}
//! ```

use super::types::{
    ChangeCursor, ChangeEvent, ChangeFeedReader, LayoutProvider, LogServer, MaintenanceChecker,
    ReplicationSlotInfo, RetentionCommitter, ScanCursor, ScanRequest, ScannedRow,
    SnapshotScanner, TableLayout,
};
use crate::error::{Error, Result};
use crate::position::{LogPosition, PositionMarker};
use crate::types::{JsonValue, TableId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Definition
// ============================================================================

/// Static description of a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDefinition {
    /// Replication slot
    pub slot: FixtureSlot,
    /// Current end of the log
    pub current_position: LogPosition,
    /// Tables and their contents
    #[serde(default)]
    pub tables: Vec<FixtureTable>,
    /// Change log contents
    #[serde(default)]
    pub changes: Vec<FixtureChange>,
    /// Injected collaborator failures
    #[serde(default)]
    pub failures: FixtureFailures,
}

/// Replication slot facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSlot {
    pub name: String,
    pub confirmed_flushed: LogPosition,
    #[serde(default = "default_true")]
    pub exists: bool,
    #[serde(default = "default_one")]
    pub count: usize,
}

/// One table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureTable {
    /// `namespace.name`
    pub table: String,
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    #[serde(default = "default_rows_per_page")]
    pub rows_per_page: u32,
    #[serde(default)]
    pub file_node: Option<u32>,
    #[serde(default)]
    pub under_maintenance: bool,
    /// Field copied into the record key
    #[serde(default)]
    pub key_field: Option<String>,
    #[serde(default)]
    pub rows: Vec<JsonValue>,
}

/// One change in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureChange {
    pub table: String,
    pub position: LogPosition,
    #[serde(default)]
    pub key: Option<JsonValue>,
    pub data: JsonValue,
}

/// Collaborator calls that should fail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureFailures {
    #[serde(default)]
    pub slot: bool,
    #[serde(default)]
    pub layout: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub commit: bool,
    #[serde(default)]
    pub advance: bool,
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_block_size() -> u64 {
    8192
}

fn default_rows_per_page() -> u32 {
    4
}

impl FixtureDefinition {
    /// Create a definition with an empty log and no tables
    pub fn new(slot: impl Into<String>, confirmed_flushed: LogPosition, current: LogPosition) -> Self {
        Self {
            slot: FixtureSlot {
                name: slot.into(),
                confirmed_flushed,
                exists: true,
                count: 1,
            },
            current_position: current,
            tables: Vec::new(),
            changes: Vec::new(),
            failures: FixtureFailures::default(),
        }
    }

    /// Add a table
    #[must_use]
    pub fn with_table(mut self, table: FixtureTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Add a change
    #[must_use]
    pub fn with_change(mut self, table: &str, position: LogPosition, data: JsonValue) -> Self {
        self.changes.push(FixtureChange {
            table: table.to_string(),
            position,
            key: None,
            data,
        });
        self
    }

    /// Inject failures
    #[must_use]
    pub fn with_failures(mut self, failures: FixtureFailures) -> Self {
        self.failures = failures;
        self
    }
}

impl FixtureTable {
    /// Create an empty table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            block_size: default_block_size(),
            rows_per_page: default_rows_per_page(),
            file_node: None,
            under_maintenance: false,
            key_field: None,
            rows: Vec::new(),
        }
    }

    /// Fill with `count` rows of the form `{"id": n}`
    #[must_use]
    pub fn with_rows(mut self, count: usize) -> Self {
        self.rows = (1..=count).map(|id| serde_json::json!({ "id": id })).collect();
        self.key_field = Some("id".to_string());
        self
    }

    /// Set rows per page
    #[must_use]
    pub fn with_rows_per_page(mut self, rows_per_page: u32) -> Self {
        self.rows_per_page = rows_per_page;
        self
    }

    /// Set file node
    #[must_use]
    pub fn with_file_node(mut self, file_node: u32) -> Self {
        self.file_node = Some(file_node);
        self
    }

    /// Mark as under maintenance
    #[must_use]
    pub fn under_maintenance(mut self) -> Self {
        self.under_maintenance = true;
        self
    }

    fn marker_of(&self, index: usize) -> PositionMarker {
        let per_page = self.rows_per_page.max(1) as usize;
        PositionMarker::new((index / per_page) as u64, (index % per_page) as u32 + 1)
    }

    fn layout(&self) -> TableLayout {
        let per_page = self.rows_per_page.max(1) as usize;
        TableLayout {
            block_size: self.block_size,
            relation_pages: self.rows.len().div_ceil(per_page) as u64,
            file_node: self.file_node,
            max_tuples_per_page: Some(self.rows_per_page),
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// In-memory source implementing every collaborator trait
#[derive(Debug)]
pub struct FixtureSource {
    definition: FixtureDefinition,
    tables: HashMap<TableId, FixtureTable>,
    current: Mutex<LogPosition>,
    commits: Mutex<Vec<LogPosition>>,
    opened: Mutex<Vec<String>>,
    advances: AtomicUsize,
    open_cursors: Arc<AtomicUsize>,
}

impl FixtureSource {
    /// Build from a definition
    pub fn new(definition: FixtureDefinition) -> Result<Self> {
        let mut tables = HashMap::new();
        for table in &definition.tables {
            tables.insert(table.table.parse::<TableId>()?, table.clone());
        }
        for change in &definition.changes {
            change.table.parse::<TableId>()?;
        }

        Ok(Self {
            current: Mutex::new(definition.current_position),
            definition,
            tables,
            commits: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            advances: AtomicUsize::new(0),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Load from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read source file {}: {e}", path.display()))
        })?;
        Self::from_str(&content)
    }

    /// Parse from a YAML or JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Self::new(serde_yaml::from_str(content)?)
    }

    /// Positions passed to the retention committer, in call order
    pub fn commits(&self) -> Vec<LogPosition> {
        lock(&self.commits).clone()
    }

    /// Resources opened so far, in order (`scan:<table>` or `feed`)
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }

    /// Number of log advances requested
    pub fn advance_count(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    /// Cursors currently open
    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn injected(what: &str) -> Error {
        Error::Other(format!("injected {what} failure"))
    }

    fn track_open(&self, name: String) -> CursorGuard {
        lock(&self.opened).push(name);
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        CursorGuard {
            open_cursors: Arc::clone(&self.open_cursors),
            released: false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Decrements the open cursor count exactly once
#[derive(Debug)]
struct CursorGuard {
    open_cursors: Arc<AtomicUsize>,
    released: bool,
}

impl CursorGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl LogServer for FixtureSource {
    async fn slot_info(&self, slot: &str) -> Result<ReplicationSlotInfo> {
        if self.definition.failures.slot {
            return Err(Self::injected("slot lookup"));
        }
        let def = &self.definition.slot;
        let exists = def.exists && def.name == slot;
        Ok(ReplicationSlotInfo {
            slot_name: slot.to_string(),
            confirmed_flushed: def.confirmed_flushed,
            exists,
            slot_count: if exists { def.count } else { 0 },
        })
    }

    async fn current_position(&self) -> Result<LogPosition> {
        Ok(*lock(&self.current))
    }

    async fn advance_position(&self) -> Result<()> {
        if self.definition.failures.advance {
            return Err(Self::injected("log advance"));
        }
        self.advances.fetch_add(1, Ordering::SeqCst);
        let mut current = lock(&self.current);
        *current = LogPosition::from_u64(current.as_u64().saturating_add(1));
        Ok(())
    }
}

#[async_trait]
impl RetentionCommitter for FixtureSource {
    async fn commit(
        &self,
        target: LogPosition,
        _slot: &str,
        _publication: &str,
        _plugin: &str,
    ) -> Result<()> {
        if self.definition.failures.commit {
            return Err(Self::injected("retention commit"));
        }
        lock(&self.commits).push(target);
        Ok(())
    }
}

#[async_trait]
impl LayoutProvider for FixtureSource {
    async fn layouts(&self, tables: &[TableId]) -> Result<HashMap<TableId, TableLayout>> {
        if self.definition.failures.layout {
            return Err(Self::injected("layout lookup"));
        }
        Ok(tables
            .iter()
            .filter_map(|t| self.tables.get(t).map(|def| (t.clone(), def.layout())))
            .collect())
    }
}

#[async_trait]
impl MaintenanceChecker for FixtureSource {
    async fn tables_under_maintenance(&self, tables: &[TableId]) -> Result<Vec<TableId>> {
        if self.definition.failures.maintenance {
            return Err(Self::injected("maintenance check"));
        }
        Ok(tables
            .iter()
            .filter(|t| self.tables.get(t).is_some_and(|def| def.under_maintenance))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotScanner for FixtureSource {
    async fn open_scan(&self, request: &ScanRequest) -> Result<Box<dyn ScanCursor>> {
        let def = self
            .tables
            .get(&request.table)
            .ok_or_else(|| Error::Other(format!("unknown table {}", request.table)))?;

        let rows = def
            .rows
            .iter()
            .enumerate()
            .map(|(index, data)| ScannedRow {
                marker: def.marker_of(index),
                key: def
                    .key_field
                    .as_ref()
                    .and_then(|field| data.get(field).cloned()),
                data: data.clone(),
            })
            .filter(|row| request.resume_after.map_or(true, |after| row.marker > after))
            .filter(|row| request.chunks.iter().any(|c| c.contains(row.marker.page)))
            .collect();

        let guard = self.track_open(format!("scan:{}", request.table));
        Ok(Box::new(FixtureScan { rows, guard }))
    }
}

#[async_trait]
impl ChangeFeedReader for FixtureSource {
    async fn open_feed(
        &self,
        from: LogPosition,
        _tables: &[TableId],
    ) -> Result<Box<dyn ChangeCursor>> {
        let mut events = VecDeque::new();
        let mut last = from;
        for change in &self.definition.changes {
            if change.position <= from {
                continue;
            }
            last = last.max(change.position);
            events.push_back(ChangeEvent::Change {
                table: change.table.parse()?,
                position: change.position,
                key: change.key.clone(),
                data: change.data.clone(),
            });
        }
        if last > from {
            events.push_back(ChangeEvent::Checkpoint(last));
        }

        let guard = self.track_open("feed".to_string());
        Ok(Box::new(FixtureFeed { events, guard }))
    }
}

struct FixtureScan {
    rows: VecDeque<ScannedRow>,
    guard: CursorGuard,
}

#[async_trait]
impl ScanCursor for FixtureScan {
    async fn next_row(&mut self) -> Result<Option<ScannedRow>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.clear();
        self.guard.release();
        Ok(())
    }
}

struct FixtureFeed {
    events: VecDeque<ChangeEvent>,
    guard: CursorGuard,
}

#[async_trait]
impl ChangeCursor for FixtureFeed {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        Ok(self.events.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.events.clear();
        self.guard.release();
        Ok(())
    }
}
