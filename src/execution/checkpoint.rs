//! # Checkpoints
//!
//! A checkpoint ends one pass of the control loop. Only the
//! [`ConnectionRunInput`] and the behaviour stamp survive it; both are written to
//! a [`CheckpointStore`] so a restarted process resumes every connection where
//! it left off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::VersionStamp;
use crate::error::OrchestratorResult;
use crate::models::ConnectionRunInput;

/// Decision taken at the end of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// Restart the loop with fresh transient state and this input.
    ContinueAsNew(ConnectionRunInput),
    /// Stop the connection's control loop for good.
    Terminate,
}

impl Checkpoint {
    pub fn next_input(&self) -> Option<&ConnectionRunInput> {
        match self {
            Checkpoint::ContinueAsNew(input) => Some(input),
            Checkpoint::Terminate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub input: ConnectionRunInput,
    pub versions: VersionStamp,
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(input: ConnectionRunInput, versions: VersionStamp) -> Self {
        Self {
            input,
            versions,
            recorded_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.input.connection_id
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, record: &CheckpointRecord) -> OrchestratorResult<()>;
    async fn load(&self, connection_id: Uuid) -> OrchestratorResult<Option<CheckpointRecord>>;
    async fn remove(&self, connection_id: Uuid) -> OrchestratorResult<()>;
    async fn list(&self) -> OrchestratorResult<Vec<CheckpointRecord>>;
}

/// Process-local store. Records do not survive a restart.
///
/// ```rust
/// use sync_orchestrator::execution::{CheckpointStore, InMemoryCheckpointStore};
/// use sync_orchestrator::{CheckpointRecord, ConnectionRunInput, VersionStamp};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryCheckpointStore::new();
/// let connection_id = uuid::Uuid::new_v4();
/// let record = CheckpointRecord::new(ConnectionRunInput::new(connection_id), VersionStamp::current());
///
/// store.save(&record).await.unwrap();
/// assert_eq!(store.load(connection_id).await.unwrap(), Some(record));
///
/// store.remove(connection_id).await.unwrap();
/// assert!(store.is_empty());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: DashMap<Uuid, CheckpointRecord>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> OrchestratorResult<()> {
        self.records.insert(record.connection_id(), record.clone());
        Ok(())
    }

    async fn load(&self, connection_id: Uuid) -> OrchestratorResult<Option<CheckpointRecord>> {
        Ok(self.records.get(&connection_id).map(|entry| entry.clone()))
    }

    async fn remove(&self, connection_id: Uuid) -> OrchestratorResult<()> {
        self.records.remove(&connection_id);
        Ok(())
    }

    async fn list(&self) -> OrchestratorResult<Vec<CheckpointRecord>> {
        Ok(self.records.iter().map(|entry| entry.value().clone()).collect())
    }
}

/// One JSON file per connection, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    pub async fn open(directory: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    fn path_for(&self, connection_id: Uuid) -> PathBuf {
        self.directory.join(format!("{connection_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> OrchestratorResult<()> {
        let path = self.path_for(record.connection_id());
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(connection_id = %record.connection_id(), path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, connection_id: Uuid) -> OrchestratorResult<Option<CheckpointRecord>> {
        match tokio::fs::read(self.path_for(connection_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&self, connection_id: Uuid) -> OrchestratorResult<()> {
        match tokio::fs::remove_file(self.path_for(connection_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self) -> OrchestratorResult<Vec<CheckpointRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CheckpointRecord {
        let mut input = ConnectionRunInput::new(Uuid::new_v4());
        input.job_id = Some(11);
        input.attempt_number = 2;
        input.from_failure = true;
        CheckpointRecord::new(input, VersionStamp::current())
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCheckpointStore::new();
        let record = record();
        store.save(&record).await.unwrap();
        assert_eq!(store.load(record.connection_id()).await.unwrap(), Some(record.clone()));
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.remove(record.connection_id()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = record();
        {
            let store = FileCheckpointStore::open(dir.path()).await.unwrap();
            store.save(&record).await.unwrap();
        }

        let reopened = FileCheckpointStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load(record.connection_id()).await.unwrap().unwrap();
        assert_eq!(loaded.input, record.input);
        assert_eq!(loaded.versions, record.versions);
        assert_eq!(reopened.list().await.unwrap().len(), 1);

        reopened.remove(record.connection_id()).await.unwrap();
        reopened.remove(record.connection_id()).await.unwrap();
        assert_eq!(reopened.load(record.connection_id()).await.unwrap(), None);
    }

    #[test]
    fn test_checkpoint_next_input() {
        let input = ConnectionRunInput::new(Uuid::new_v4());
        assert_eq!(
            Checkpoint::ContinueAsNew(input.clone()).next_input(),
            Some(&input)
        );
        assert_eq!(Checkpoint::Terminate.next_input(), None);
    }
}
