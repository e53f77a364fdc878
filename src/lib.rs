#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Sync Orchestrator
//!
//! Durable per-connection control loops for a data-synchronization platform.
//!
//! ## Overview
//!
//! Every connection gets a long-lived control loop that waits for its next
//! scheduled run (or a manual trigger), creates a job and an attempt, checks
//! the source and destination, runs the sync, and decides what happens next:
//! another attempt after a backoff, a terminal failure, or the next scheduled
//! run. The loop reacts to external signals at any point: manual sync, cancel,
//! reset, configuration update and delete.
//!
//! The loop restarts itself after every run through an explicit checkpoint, so
//! its state is always the small [`ConnectionRunInput`] that a restarted
//! process needs to resume it.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Control loop, check phase, failure classification, supervisor
//! - [`execution`] - Activity runner, signals, cancellation scope, nested executions, checkpoints
//! - [`retry`] - Backoff policy and retry manager
//! - [`services`] - Collaborator interfaces and in-memory implementations
//! - [`models`] - Run input, run state, failure reasons, job payloads
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sync_orchestrator::execution::InMemoryCheckpointStore;
//! use sync_orchestrator::{Collaborators, ConnectionRunInput, ConnectionSupervisor, OrchestratorConfig};
//!
//! # fn example(collaborators: Collaborators) -> sync_orchestrator::OrchestratorResult<()> {
//! sync_orchestrator::logging::init_tracing();
//! let config = OrchestratorConfig::load(None)?;
//! let supervisor =
//!     ConnectionSupervisor::new(collaborators, config, Arc::new(InMemoryCheckpointStore::new()));
//!
//! let handle = supervisor.start(ConnectionRunInput::new(uuid::Uuid::new_v4()));
//! handle.submit_manual_sync();
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Time-dependent behaviour is tested against tokio's paused clock:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and control-loop integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod retry;
pub mod services;

pub use config::OrchestratorConfig;
pub use error::{
    ActivityError, NestedExecutionError, OrchestratorError, OrchestratorResult, ServiceError,
    ServiceResult,
};
pub use execution::{Checkpoint, CheckpointRecord, VersionStamp};
pub use models::{ConnectionRunInput, JobInformation, RunState};
pub use orchestration::{
    ConnectionManager, ConnectionManagerHandle, ConnectionSignal, ConnectionSupervisor,
};
pub use retry::{BackoffPolicy, RetryManager};
pub use services::Collaborators;
