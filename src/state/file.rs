//! File-based state store
//!
//! One JSON file per sync identity, written atomically.

use super::store::{StateStore, StoredState, SyncIdentity};
use super::types::GlobalSyncState;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// State store writing JSON files into a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    /// Directory holding state files
    dir: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at a directory
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for an identity
    pub fn path_for(&self, identity: &SyncIdentity) -> PathBuf {
        self.dir
            .join(format!("state_{}.json", identity.storage_key()))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, identity: &SyncIdentity) -> Result<Option<GlobalSyncState>> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;

        let stored: StoredState = serde_json::from_str(&contents)
            .map_err(|e| Error::state(format!("Failed to parse state file: {e}")))?;

        if stored.identity != *identity {
            return Err(Error::state(format!(
                "State file {} belongs to connection '{}' slot '{}'",
                path.display(),
                stored.identity.connection_id,
                stored.identity.slot
            )));
        }

        Ok(Some(stored.state))
    }

    async fn save(&self, identity: &SyncIdentity, state: &GlobalSyncState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::state(format!("Failed to create state directory: {e}")))?;

        let stored = StoredState {
            identity: identity.clone(),
            state: state.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))?;

        // Write to temp file first, then rename for atomicity
        let path = self.path_for(identity);
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }
}
