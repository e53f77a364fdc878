//! # Connection Supervisor
//!
//! Owns one control loop per connection. Each loop runs on its own tokio task
//! and persists its checkpoints in a shared [`CheckpointStore`], so a new
//! supervisor can resume every connection that had not terminated when the
//! previous process went away.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use sync_orchestrator::{Collaborators, ConnectionRunInput, ConnectionSignal, OrchestratorConfig};
//! # use sync_orchestrator::execution::FileCheckpointStore;
//! # use sync_orchestrator::orchestration::ConnectionSupervisor;
//! # async fn example(collaborators: Collaborators, connection_id: uuid::Uuid) -> sync_orchestrator::OrchestratorResult<()> {
//! let store = Arc::new(FileCheckpointStore::open("/var/lib/sync/checkpoints").await?);
//! let supervisor = ConnectionSupervisor::new(collaborators, OrchestratorConfig::default(), store);
//!
//! supervisor.resume_all().await?;
//! supervisor.start(ConnectionRunInput::new(connection_id));
//! supervisor.signal(connection_id, ConnectionSignal::SubmitManualSync)?;
//! # Ok(())
//! # }
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::connection_manager::ConnectionManager;
use super::control::{ConnectionManagerHandle, ConnectionSignal};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::execution::{CheckpointRecord, CheckpointStore, VersionStamp};
use crate::models::{ConnectionRunInput, JobInformation, RunState};
use crate::services::Collaborators;

struct ManagedConnection {
    generation: u64,
    handle: ConnectionManagerHandle,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStats {
    pub active_connections: usize,
    pub started_total: u64,
}

pub struct ConnectionSupervisor {
    collaborators: Collaborators,
    config: OrchestratorConfig,
    store: Arc<dyn CheckpointStore>,
    versions: VersionStamp,
    connections: Arc<DashMap<Uuid, ManagedConnection>>,
    generations: AtomicU64,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("active_connections", &self.connections.len())
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    pub fn new(
        collaborators: Collaborators,
        config: OrchestratorConfig,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            collaborators,
            config,
            store,
            versions: VersionStamp::current(),
            connections: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Behaviour stamp adopted by fresh checkpoints of every managed connection.
    pub fn with_versions(mut self, versions: VersionStamp) -> Self {
        self.versions = versions;
        self
    }

    /// Start the control loop for `input.connection_id`. A connection that is
    /// already running keeps its loop and the existing handle is returned.
    pub fn start(&self, input: ConnectionRunInput) -> ConnectionManagerHandle {
        self.spawn(CheckpointRecord::new(input, self.versions.clone()))
    }

    /// Resume every persisted connection. Returns how many records were found.
    pub async fn resume_all(&self) -> OrchestratorResult<usize> {
        let records = self.store.list().await?;
        let count = records.len();
        for record in records {
            self.spawn(record);
        }
        info!(resumed = count, "Resumed persisted connections");
        Ok(count)
    }

    fn spawn(&self, record: CheckpointRecord) -> ConnectionManagerHandle {
        let connection_id = record.connection_id();

        // the entry lock is held until the new loop is registered
        let entry = match self.connections.entry(connection_id) {
            Entry::Occupied(existing) if !existing.get().task.is_finished() => {
                debug!(connection_id = %connection_id, "Control loop already running");
                return existing.get().handle.clone();
            }
            entry => entry,
        };

        let mut manager =
            ConnectionManager::new(connection_id, self.collaborators.clone(), &self.config)
                .with_checkpoint_store(self.store.clone())
                .with_versions(self.versions.clone());
        let handle = manager.handle();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let connections = Arc::clone(&self.connections);

        let task = tokio::spawn(async move {
            if let Err(err) = manager.run(record).await {
                error!(connection_id = %connection_id, error = %err, "Control loop stopped with an error");
            }
            connections.remove_if(&connection_id, |_, managed| managed.generation == generation);
        });

        entry.insert(ManagedConnection {
            generation,
            handle: handle.clone(),
            task,
        });
        info!(connection_id = %connection_id, generation = generation, "Control loop started");
        handle
    }

    pub fn handle(&self, connection_id: Uuid) -> OrchestratorResult<ConnectionManagerHandle> {
        self.connections
            .get(&connection_id)
            .filter(|managed| !managed.task.is_finished())
            .map(|managed| managed.handle.clone())
            .ok_or(OrchestratorError::ConnectionNotFound(connection_id))
    }

    pub fn signal(&self, connection_id: Uuid, signal: ConnectionSignal) -> OrchestratorResult<bool> {
        Ok(self.handle(connection_id)?.deliver(signal))
    }

    pub fn state(&self, connection_id: Uuid) -> OrchestratorResult<RunState> {
        Ok(self.handle(connection_id)?.state())
    }

    pub fn job_information(&self, connection_id: Uuid) -> OrchestratorResult<JobInformation> {
        Ok(self.handle(connection_id)?.job_information())
    }

    pub fn is_active(&self, connection_id: Uuid) -> bool {
        self.handle(connection_id).is_ok()
    }

    pub fn active_connections(&self) -> Vec<Uuid> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().task.is_finished())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            active_connections: self.active_connections().len(),
            started_total: self.generations.load(Ordering::Relaxed),
        }
    }

    /// Stop every loop without touching persisted checkpoints.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        let tasks: Vec<JoinHandle<()>> = ids
            .into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .map(|(_, managed)| {
                managed.task.abort();
                managed.task
            })
            .collect();

        let stopped = tasks.len();
        futures::future::join_all(tasks).await;
        info!(stopped = stopped, "Connection supervisor shut down");
    }
}
