//! State store trait and in-memory implementation
//!
//! Persisted state is keyed by the identity of the sync, so two connections
//! sharing a store never read each other's checkpoints.

use super::types::GlobalSyncState;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use tokio::sync::RwLock;

/// Identity a persisted state is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncIdentity {
    /// Connection identifier
    pub connection_id: String,
    /// Replication slot the state is anchored to
    pub slot: String,
}

impl SyncIdentity {
    /// Create a new identity
    pub fn new(connection_id: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            slot: slot.into(),
        }
    }

    /// Filesystem-safe key derived from the identity.
    ///
    /// Characters outside `[A-Za-z0-9_-]` are percent-escaped and the two
    /// parts are joined with `.`, so distinct identities never share a key.
    pub fn storage_key(&self) -> String {
        format!("{}.{}", escape(&self.connection_id), escape(&self.slot))
    }
}

fn escape(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            escaped.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{byte:02X}");
            }
        }
    }
    escaped
}

/// State envelope as written by a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    /// Identity the state belongs to
    pub identity: SyncIdentity,
    /// The state itself
    pub state: GlobalSyncState,
    /// When the state was saved
    pub saved_at: DateTime<Utc>,
}

/// Load/save of sync state between runs.
///
/// A missing state is a valid first-run signal and is returned as `None`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state for an identity
    async fn load(&self, identity: &SyncIdentity) -> Result<Option<GlobalSyncState>>;

    /// Save the state for an identity
    async fn save(&self, identity: &SyncIdentity, state: &GlobalSyncState) -> Result<()>;
}

/// State store kept in memory (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<SyncIdentity, StoredState>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one state
    pub fn with_state(identity: &SyncIdentity, state: GlobalSyncState) -> Self {
        let mut states = HashMap::new();
        states.insert(
            identity.clone(),
            StoredState {
                identity: identity.clone(),
                state,
                saved_at: Utc::now(),
            },
        );
        Self {
            states: RwLock::new(states),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, identity: &SyncIdentity) -> Result<Option<GlobalSyncState>> {
        let states = self.states.read().await;
        Ok(states
            .get(identity)
            .map(|stored| stored.state.clone()))
    }

    async fn save(&self, identity: &SyncIdentity, state: &GlobalSyncState) -> Result<()> {
        let mut states = self.states.write().await;
        states.insert(
            identity.clone(),
            StoredState {
                identity: identity.clone(),
                state: state.clone(),
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }
}
