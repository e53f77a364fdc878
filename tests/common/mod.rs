//! Shared fakes for control-loop integration tests.
//!
//! Real in-memory services are used where the crate ships one; the rest are
//! scripted so each test can dictate the sync and check outcomes.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sync_orchestrator::config::RetriesConfig;
use sync_orchestrator::execution::{CheckExecution, SyncExecution};
use sync_orchestrator::models::{
    ActorType, AttemptFailureSummary, CheckConnectionOutput, CheckRequest, ConnectionContext,
    FailureReason, JobInput, SyncInput, SyncOutput,
};
use sync_orchestrator::services::{
    AutoDisableService, ConnectionSchedule, FeatureFlagService, InMemoryJobTracker,
    InMemoryRetryStateStore, InMemoryScheduleService, JobService, MetricAttribute, MetricsSink,
    ProgressService, TrackedJob,
};
use sync_orchestrator::{
    Collaborators, ConnectionManager, NestedExecutionError, OrchestratorConfig, ServiceError,
    ServiceResult,
};

/// Activity timings small enough for paused-clock tests.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.workflow.restart_delay_seconds = 30;
    config.activity.start_to_close_timeout_seconds = 5;
    config.activity.max_attempts = 2;
    config.activity.initial_interval_ms = 10;
    config.activity.maximum_interval_seconds = 1;
    config
}

pub fn retries_disabled() -> RetriesConfig {
    RetriesConfig {
        enabled: false,
        ..RetriesConfig::default()
    }
}

/// Poll `condition` until it holds, sleeping between checks.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..50_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was never reached");
}

fn take_one(plan: &Mutex<HashMap<&'static str, u32>>, operation: &'static str) -> bool {
    let mut plan = plan.lock();
    match plan.get_mut(operation) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Job service that injects transient failures around a real tracker.
pub struct FlakyJobs {
    pub inner: Arc<InMemoryJobTracker>,
    fail_before: Mutex<HashMap<&'static str, u32>>,
    fail_after: Mutex<HashMap<&'static str, u32>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl FlakyJobs {
    pub fn new(inner: Arc<InMemoryJobTracker>) -> Self {
        Self {
            inner,
            fail_before: Mutex::new(HashMap::new()),
            fail_after: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls of `operation` without applying them.
    pub fn fail_before(&self, operation: &'static str, times: u32) {
        self.fail_before.lock().insert(operation, times);
    }

    /// Apply the next `times` calls of `operation`, then report them failed.
    pub fn fail_after(&self, operation: &'static str, times: u32) {
        self.fail_after.lock().insert(operation, times);
    }

    pub fn clear_faults(&self) {
        self.fail_before.lock().clear();
        self.fail_after.lock().clear();
    }

    pub fn calls(&self, operation: &'static str) -> u32 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    fn enter(&self, operation: &'static str) -> ServiceResult<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        if take_one(&self.fail_before, operation) {
            return Err(ServiceError::Unavailable(format!("{operation} injected failure")));
        }
        Ok(())
    }

    fn leave<T>(&self, operation: &'static str, result: ServiceResult<T>) -> ServiceResult<T> {
        if result.is_ok() && take_one(&self.fail_after, operation) {
            return Err(ServiceError::Unavailable(format!("{operation} response lost")));
        }
        result
    }
}

#[async_trait]
impl JobService for FlakyJobs {
    async fn create_job(&self, connection_id: Uuid, is_scheduled: bool) -> ServiceResult<i64> {
        self.enter("create_job")?;
        let result = self.inner.create_job(connection_id, is_scheduled).await;
        self.leave("create_job", result)
    }

    async fn create_attempt(&self, job_id: i64) -> ServiceResult<u32> {
        self.enter("create_attempt")?;
        let result = self.inner.create_attempt(job_id).await;
        self.leave("create_attempt", result)
    }

    async fn report_job_start(&self, job_id: i64, connection_id: Uuid) -> ServiceResult<()> {
        self.enter("report_job_start")?;
        let result = self.inner.report_job_start(job_id, connection_id).await;
        self.leave("report_job_start", result)
    }

    async fn report_job_success(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        output: &SyncOutput,
    ) -> ServiceResult<()> {
        self.enter("report_job_success")?;
        let result = self
            .inner
            .report_job_success(job_id, attempt_number, connection_id, output)
            .await;
        self.leave("report_job_success", result)
    }

    async fn report_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        summary: &AttemptFailureSummary,
        output: Option<&SyncOutput>,
    ) -> ServiceResult<()> {
        self.enter("report_attempt_failure")?;
        let result = self
            .inner
            .report_attempt_failure(job_id, attempt_number, connection_id, summary, output)
            .await;
        self.leave("report_attempt_failure", result)
    }

    async fn report_job_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        reason: &str,
    ) -> ServiceResult<()> {
        self.enter("report_job_failure")?;
        let result = self
            .inner
            .report_job_failure(job_id, attempt_number, connection_id, reason)
            .await;
        self.leave("report_job_failure", result)
    }

    async fn report_job_cancelled(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
        summary: &AttemptFailureSummary,
    ) -> ServiceResult<()> {
        self.enter("report_job_cancelled")?;
        let result = self
            .inner
            .report_job_cancelled(job_id, attempt_number, connection_id, summary)
            .await;
        self.leave("report_job_cancelled", result)
    }

    async fn ensure_clean_job_state(&self, connection_id: Uuid) -> ServiceResult<()> {
        self.enter("ensure_clean_job_state")?;
        let result = self.inner.ensure_clean_job_state(connection_id).await;
        self.leave("ensure_clean_job_state", result)
    }

    async fn is_last_job_or_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<bool> {
        self.enter("is_last_job_or_attempt_failure")?;
        let result = self
            .inner
            .is_last_job_or_attempt_failure(job_id, attempt_number, connection_id)
            .await;
        self.leave("is_last_job_or_attempt_failure", result)
    }

    async fn generate_job_input(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<JobInput> {
        self.enter("generate_job_input")?;
        let result = self
            .inner
            .generate_job_input(job_id, attempt_number, connection_id)
            .await;
        self.leave("generate_job_input", result)
    }

    async fn delete_stream_reset_records(&self, job_id: i64, connection_id: Uuid) -> ServiceResult<()> {
        self.enter("delete_stream_reset_records")?;
        let result = self.inner.delete_stream_reset_records(job_id, connection_id).await;
        self.leave("delete_stream_reset_records", result)
    }

    async fn append_to_attempt_log(
        &self,
        job_id: i64,
        attempt_number: u32,
        message: &str,
    ) -> ServiceResult<()> {
        self.enter("append_to_attempt_log")?;
        let result = self
            .inner
            .append_to_attempt_log(job_id, attempt_number, message)
            .await;
        self.leave("append_to_attempt_log", result)
    }
}

#[derive(Debug, Clone)]
pub enum SyncBehavior {
    Succeed(u64),
    Fail {
        records_committed: u64,
        failures: Vec<FailureReason>,
    },
    /// The sync reports a cancelled replication.
    Cancelled,
    /// Block until the execution is cancelled.
    Hang,
    ActivityFailure(String),
    Error(String),
}

/// Sync execution that plays a script; succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedSync {
    script: Mutex<VecDeque<SyncBehavior>>,
    inputs: Mutex<Vec<SyncInput>>,
}

impl ScriptedSync {
    pub fn push(&self, behavior: SyncBehavior) {
        self.script.lock().push_back(behavior);
    }

    pub fn inputs(&self) -> Vec<SyncInput> {
        self.inputs.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }
}

#[async_trait]
impl SyncExecution for ScriptedSync {
    async fn sync(
        &self,
        input: SyncInput,
        cancellation: CancellationToken,
    ) -> Result<SyncOutput, NestedExecutionError> {
        let execution_id = format!("sync_{}", input.job_run_config.job_id);
        self.inputs.lock().push(input);
        let behavior = self.script.lock().pop_front();

        match behavior.unwrap_or(SyncBehavior::Succeed(100)) {
            SyncBehavior::Succeed(records) => Ok(SyncOutput::succeeded(records)),
            SyncBehavior::Fail {
                records_committed,
                failures,
            } => Ok(SyncOutput::failed(records_committed, failures)),
            SyncBehavior::Cancelled => Ok(SyncOutput::cancelled()),
            SyncBehavior::Hang => {
                cancellation.cancelled().await;
                Err(NestedExecutionError::Cancelled { execution_id })
            }
            SyncBehavior::ActivityFailure(message) => Err(NestedExecutionError::ActivityFailed {
                execution_id,
                activity: "replicate".to_string(),
                message,
            }),
            SyncBehavior::Error(message) => Err(NestedExecutionError::Failed {
                execution_id,
                message,
            }),
        }
    }
}

/// Check execution answering per actor from a script; succeeds by default.
#[derive(Default)]
pub struct ScriptedCheck {
    outputs: Mutex<HashMap<ActorType, VecDeque<CheckConnectionOutput>>>,
    requests: Mutex<Vec<CheckRequest>>,
}

impl ScriptedCheck {
    pub fn push(&self, actor_type: ActorType, output: CheckConnectionOutput) {
        self.outputs
            .lock()
            .entry(actor_type)
            .or_default()
            .push_back(output);
    }

    pub fn requests(&self) -> Vec<CheckRequest> {
        self.requests.lock().clone()
    }

    pub fn checked_actors(&self) -> Vec<ActorType> {
        self.requests
            .lock()
            .iter()
            .map(CheckRequest::actor_type)
            .collect()
    }
}

#[async_trait]
impl CheckExecution for ScriptedCheck {
    async fn check(
        &self,
        request: CheckRequest,
        _cancellation: CancellationToken,
    ) -> Result<CheckConnectionOutput, NestedExecutionError> {
        let actor_type = request.actor_type();
        self.requests.lock().push(request);
        let output = self
            .outputs
            .lock()
            .get_mut(&actor_type)
            .and_then(VecDeque::pop_front);
        Ok(output.unwrap_or_else(CheckConnectionOutput::succeeded))
    }
}

/// Metrics sink that keeps every recorded counter.
#[derive(Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Vec<(String, Vec<MetricAttribute>)>>,
}

impl RecordingMetrics {
    pub fn count(&self, metric: &str) -> usize {
        self.recorded
            .lock()
            .iter()
            .filter(|(name, _)| name == metric)
            .count()
    }

    pub fn count_with(&self, metric: &str, key: &str, value: &str) -> usize {
        self.recorded
            .lock()
            .iter()
            .filter(|(name, labels)| {
                name == metric
                    && labels
                        .iter()
                        .any(|label| label.key == key && label.value == value)
            })
            .count()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn record_count(&self, metric: &str, attributes: &[MetricAttribute]) -> ServiceResult<()> {
        self.recorded
            .lock()
            .push((metric.to_string(), attributes.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProgress {
    pub made_progress: AtomicBool,
}

#[async_trait]
impl ProgressService for FakeProgress {
    async fn check_progress(&self, _job_id: i64, _attempt: u32, _connection_id: Uuid) -> ServiceResult<bool> {
        Ok(self.made_progress.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct FakeAutoDisable {
    pub evaluations: AtomicUsize,
}

#[async_trait]
impl AutoDisableService for FakeAutoDisable {
    async fn evaluate_and_disable(&self, _connection_id: Uuid) -> ServiceResult<bool> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

#[derive(Default)]
pub struct FakeFlags {
    pub flags: Mutex<HashMap<String, bool>>,
    pub unavailable: AtomicBool,
}

impl FakeFlags {
    pub fn set(&self, flag: &str, value: bool) {
        self.flags.lock().insert(flag.to_string(), value);
    }
}

#[async_trait]
impl FeatureFlagService for FakeFlags {
    async fn get_flags(&self, _connection_id: Uuid) -> ServiceResult<HashMap<String, bool>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("flag service down".to_string()));
        }
        Ok(self.flags.lock().clone())
    }
}

/// One connection wired to fakes.
pub struct Harness {
    pub connection_id: Uuid,
    pub tracker: Arc<InMemoryJobTracker>,
    pub jobs: Arc<FlakyJobs>,
    pub schedule: Arc<InMemoryScheduleService>,
    pub retry_state: Arc<InMemoryRetryStateStore>,
    pub progress: Arc<FakeProgress>,
    pub auto_disable: Arc<FakeAutoDisable>,
    pub flags: Arc<FakeFlags>,
    pub metrics: Arc<RecordingMetrics>,
    pub legacy_check: Arc<ScriptedCheck>,
    pub command_check: Arc<ScriptedCheck>,
    pub sync: Arc<ScriptedSync>,
}

impl Harness {
    /// Retry manager disabled: the attempt ceiling decides retries.
    pub fn new(max_attempts: u32) -> Self {
        Self::with_retries(max_attempts, retries_disabled())
    }

    pub fn with_retries(max_attempts: u32, retries: RetriesConfig) -> Self {
        let connection_id = Uuid::new_v4();
        let tracker = Arc::new(InMemoryJobTracker::new());
        let schedule = Arc::new(InMemoryScheduleService::new(max_attempts));
        schedule.register(
            ConnectionContext::generate(connection_id),
            ConnectionSchedule::Manual,
        );

        Self {
            connection_id,
            jobs: Arc::new(FlakyJobs::new(tracker.clone())),
            tracker,
            schedule,
            retry_state: Arc::new(InMemoryRetryStateStore::new(retries)),
            progress: Arc::new(FakeProgress::default()),
            auto_disable: Arc::new(FakeAutoDisable::default()),
            flags: Arc::new(FakeFlags::default()),
            metrics: Arc::new(RecordingMetrics::default()),
            legacy_check: Arc::new(ScriptedCheck::default()),
            command_check: Arc::new(ScriptedCheck::default()),
            sync: Arc::new(ScriptedSync::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            jobs: self.jobs.clone(),
            schedule: self.schedule.clone(),
            retry_state: self.retry_state.clone(),
            progress: self.progress.clone(),
            auto_disable: self.auto_disable.clone(),
            feature_flags: self.flags.clone(),
            metrics: self.metrics.clone(),
            legacy_check: self.legacy_check.clone(),
            command_check: self.command_check.clone(),
            sync: self.sync.clone(),
        }
    }

    pub fn manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.connection_id, self.collaborators(), &fast_config())
    }

    pub fn jobs(&self) -> Vec<TrackedJob> {
        self.tracker.jobs_for_connection(self.connection_id)
    }

    pub fn job(&self, job_id: i64) -> TrackedJob {
        self.tracker.job(job_id).expect("job exists")
    }

    /// A terminally failed job, so the next run checks the connection.
    pub async fn seed_failed_job(&self) -> i64 {
        let job_id = self
            .tracker
            .create_job(self.connection_id, true)
            .await
            .unwrap();
        let attempt = self.tracker.create_attempt(job_id).await.unwrap();
        self.tracker
            .report_attempt_failure(
                job_id,
                attempt,
                self.connection_id,
                &AttemptFailureSummary::default(),
                None,
            )
            .await
            .unwrap();
        self.tracker
            .report_job_failure(job_id, attempt + 1, self.connection_id, "seeded failure")
            .await
            .unwrap();
        job_id
    }
}
