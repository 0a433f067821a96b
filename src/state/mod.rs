//! State management module
//!
//! Tracks the global log position and per-table snapshot progress.
//! State is persisted between sync runs to enable resumable syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `GlobalSyncState` - Log position plus per-table `TableSyncState`
//! - `StateStore` - Load/save keyed by `SyncIdentity`
//! - `FileStateStore` / `MemoryStateStore` - Store implementations

mod file;
mod store;
mod types;

pub use file::FileStateStore;
pub use store::{MemoryStateStore, StateStore, StoredState, SyncIdentity};
pub use types::{GlobalSyncState, SnapshotProgress, TableSyncState};
