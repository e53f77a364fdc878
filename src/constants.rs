//! # Orchestrator Constants
//!
//! Metric names, metric attribute keys, feature-flag keys and sentinel values
//! shared by the control loop, its collaborators and the query surface.

/// Job id reported by queries when no job is attached to the control loop.
pub const NON_RUNNING_JOB_ID: i64 = -1;

/// Attempt number reported by queries when no attempt is active.
pub const NON_RUNNING_ATTEMPT_ID: i64 = -1;

/// Metric names emitted through [`MetricsSink`](crate::services::MetricsSink).
pub mod metrics {
    /// One per checkpoint started.
    pub const WORKFLOW_ATTEMPT: &str = "connection_manager.workflow_attempt";
    /// Job reported successful.
    pub const WORKFLOW_SUCCESS: &str = "connection_manager.workflow_success";
    /// Terminal job failure, or a cancelled cancellation scope.
    pub const WORKFLOW_FAILURE: &str = "connection_manager.workflow_failure";
    /// A failed attempt that still committed data.
    pub const MADE_PROGRESS: &str = "connection_manager.made_progress";
    /// A best-effort external operation failed.
    pub const ACTIVITY_FAILURE: &str = "connection_manager.activity_failure";
}

/// Metric attribute keys.
pub mod attributes {
    pub const CONNECTION_ID: &str = "connection_id";
    pub const JOB_ID: &str = "job_id";
    pub const ATTEMPT_NUMBER: &str = "attempt_number";
    pub const FAILURE_CAUSE: &str = "failure_cause";
    pub const MADE_PROGRESS: &str = "made_progress";
    pub const WILL_RETRY: &str = "will_retry";
    pub const ACTIVITY_NAME: &str = "activity_name";
}

/// Feature-flag keys understood by the control loop.
pub mod flags {
    /// Run connection checks as direct commands instead of the legacy nested
    /// check execution.
    pub const USE_COMMAND_CHECK: &str = "connection.use_command_check";
}

/// Prefix of the environment variables read by the configuration loader.
pub const CONFIG_ENV_PREFIX: &str = "SYNC_ORCHESTRATOR";

/// Environment variable naming the deployment environment.
pub const ENVIRONMENT_VAR: &str = "SYNC_ORCHESTRATOR_ENV";
