//! Error types for the sync orchestrator.
//!

use thiserror::Error;
use uuid::Uuid;

/// Crate-level error for the supervisor, configuration and checkpoint surfaces.
///
/// The control loop itself never returns these: failures inside a checkpoint
/// are converted into restart checkpoints or logged defaults.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No control loop registered for connection {0}")]
    ConnectionNotFound(Uuid),
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Activity(#[from] ActivityError),
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(error: config::ConfigError) -> Self {
        OrchestratorError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Checkpoint(format!("JSON serialization error: {error}"))
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(error: std::io::Error) -> Self {
        OrchestratorError::Checkpoint(format!("I/O error: {error}"))
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Error returned by an external collaborator (job tracker, scheduler, stores, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Service timeout: {0}")]
    Timeout(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the activity runner should try the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::NotFound(_) | ServiceError::Rejected(_))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure of an external operation after the substrate gave up on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    #[error("Activity {activity} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        activity: String,
        attempts: u32,
        #[source]
        source: ServiceError,
    },
    #[error("Activity {activity} failed with a non-retryable error: {source}")]
    NonRetryable {
        activity: String,
        #[source]
        source: ServiceError,
    },
}

impl ActivityError {
    pub fn activity(&self) -> &str {
        match self {
            ActivityError::RetriesExhausted { activity, .. }
            | ActivityError::NonRetryable { activity, .. } => activity,
        }
    }
}

/// A nested check or sync execution that ended without producing an output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NestedExecutionError {
    /// Cooperative cancellation through the parent's cancellation scope.
    #[error("Nested execution {execution_id} was cancelled")]
    Cancelled { execution_id: String },
    /// An activity inside the nested execution exhausted its retry budget.
    #[error("Activity {activity} failed inside nested execution {execution_id}: {message}")]
    ActivityFailed {
        execution_id: String,
        activity: String,
        message: String,
    },
    /// The nested execution failed for an unclassified reason.
    #[error("Nested execution {execution_id} failed: {message}")]
    Failed {
        execution_id: String,
        message: String,
    },
}

impl NestedExecutionError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, NestedExecutionError::Cancelled { .. })
    }

    pub fn execution_id(&self) -> &str {
        match self {
            NestedExecutionError::Cancelled { execution_id }
            | NestedExecutionError::ActivityFailed { execution_id, .. }
            | NestedExecutionError::Failed { execution_id, .. } => execution_id,
        }
    }
}
