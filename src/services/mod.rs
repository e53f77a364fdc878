//! # Collaborator Services
//!
//! Interfaces of the external systems the control loop drives: job and attempt
//! persistence, scheduling, retry state, progress, auto-disable, feature flags
//! and metrics. Every call is an external operation run through the activity
//! runner, so implementations report failures as [`ServiceError`] and never
//! retry on their own.
//!
//! In-memory implementations are provided for embedding and tests.

pub mod job_tracker;
pub mod metrics;
pub mod retry_state;
pub mod schedule;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ServiceResult;
use crate::execution::{CheckExecution, SyncExecution};
use crate::models::{AttemptFailureSummary, ConnectionContext, JobInput, SyncOutput};
use crate::retry::RetryManager;

pub use job_tracker::{InMemoryJobTracker, JobStatus, ReportKey, ReportKind, TrackedAttempt, TrackedJob};
pub use metrics::{MetricAttribute, OtelMetricsSink, TracingMetricsSink};
pub use retry_state::InMemoryRetryStateStore;
pub use schedule::{time_until_next_run, ConnectionSchedule, InMemoryScheduleService, TimeToWait};

/// Job and attempt persistence.
///
/// Attempt numbers are 0-based, as returned by [`JobService::create_attempt`].
#[async_trait]
pub trait JobService: Send + Sync {
    async fn create_job(&self, connection_id: Uuid, is_scheduled: bool) -> ServiceResult<i64>;

    async fn create_attempt(&self, job_id: i64) -> ServiceResult<u32>;

    async fn report_job_start(&self, job_id: i64, connection_id: Uuid) -> ServiceResult<()>;

    async fn report_job_success(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        output: &SyncOutput,
    ) -> ServiceResult<()>;

    async fn report_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        summary: &AttemptFailureSummary,
        output: Option<&SyncOutput>,
    ) -> ServiceResult<()>;

    /// Terminal job failure. `attempt_number` is the 1-based run counter.
    async fn report_job_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        reason: &str,
    ) -> ServiceResult<()>;

    async fn report_job_cancelled(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        summary: &AttemptFailureSummary,
    ) -> ServiceResult<()>;

    /// Fail any non-terminal job or attempt left behind by a crashed run.
    async fn ensure_clean_job_state(&self, connection_id: Uuid) -> ServiceResult<()>;

    async fn is_last_job_or_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<bool>;

    async fn generate_job_input(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<JobInput>;

    async fn delete_stream_reset_records(&self, job_id: i64, connection_id: Uuid) -> ServiceResult<()>;

    async fn append_to_attempt_log(
        &self,
        job_id: i64,
        attempt_number: u32,
        message: &str,
    ) -> ServiceResult<()>;
}

#[async_trait]
pub trait ScheduleService: Send + Sync {
    async fn get_connection_context(&self, connection_id: Uuid) -> ServiceResult<ConnectionContext>;

    async fn get_time_to_wait(&self, connection_id: Uuid) -> ServiceResult<TimeToWait>;

    /// System-wide admission delay; zero admits the connection.
    async fn get_load_shed_backoff(&self, context: &ConnectionContext) -> ServiceResult<Duration>;

    /// Attempt ceiling used when no retry manager is available.
    async fn get_max_attempts(&self) -> ServiceResult<u32>;

    async fn is_workspace_tombstoned(&self, connection_id: Uuid) -> ServiceResult<bool>;
}

/// Persisted retry managers, keyed by `(job, connection)`.
#[async_trait]
pub trait RetryStateStore: Send + Sync {
    async fn hydrate(
        &self,
        job_id: Option<i64>,
        connection_id: Uuid,
    ) -> ServiceResult<Option<RetryManager>>;

    async fn persist(
        &self,
        job_id: i64,
        connection_id: Uuid,
        manager: &RetryManager,
    ) -> ServiceResult<bool>;
}

#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Whether the attempt committed any data.
    async fn check_progress(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<bool>;
}

#[async_trait]
pub trait AutoDisableService: Send + Sync {
    /// Disable the connection if it keeps failing; returns whether it was disabled.
    async fn evaluate_and_disable(&self, connection_id: Uuid) -> ServiceResult<bool>;
}

#[async_trait]
pub trait FeatureFlagService: Send + Sync {
    async fn get_flags(&self, connection_id: Uuid) -> ServiceResult<HashMap<String, bool>>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_count(&self, metric: &str, attributes: &[MetricAttribute]) -> ServiceResult<()>;
}

/// Every collaborator a connection's control loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobService>,
    pub schedule: Arc<dyn ScheduleService>,
    pub retry_state: Arc<dyn RetryStateStore>,
    pub progress: Arc<dyn ProgressService>,
    pub auto_disable: Arc<dyn AutoDisableService>,
    pub feature_flags: Arc<dyn FeatureFlagService>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Check run as a nested execution with launcher and connector configuration.
    pub legacy_check: Arc<dyn CheckExecution>,
    /// Check run as a direct command against the actor.
    pub command_check: Arc<dyn CheckExecution>,
    pub sync: Arc<dyn SyncExecution>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
