//! # Connection Manager
//!
//! The per-connection control loop. One pass through [`ConnectionManager::run_checkpoint`]
//! is one checkpoint:
//!
//! 1. stop if the workspace is tombstoned
//! 2. hydrate the connection context
//! 3. wait out the system-wide load-shed backoff
//! 4. inside the cancellation scope: recover orphaned jobs, hydrate the retry
//!    manager, wait on the schedule (or the retry backoff) until a signal
//!    interrupts, acquire job and attempt, run the checks, run the sync and
//!    classify its outcome
//! 5. after a cancelled scope: report the cancellation, or terminate on delete
//!
//! The pass ends with a [`Checkpoint`]: restart with an explicit
//! [`ConnectionRunInput`], or terminate. [`ConnectionManager::run`] drives
//! checkpoints until termination and persists each input before running it.
//!
//! External operations the loop depends on are *mandatory*: when one exhausts
//! its retries the checkpoint ends after the restart delay with a fresh input
//! (see `activities.rs`). Everything else degrades to a logged default.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::control::ConnectionManagerHandle;
use super::failures::{self, FailureCause};
use super::Flow;
use crate::config::OrchestratorConfig;
use crate::constants::metrics;
use crate::error::{NestedExecutionError, OrchestratorResult, ServiceError};
use crate::execution::{
    run_activity, run_nested, ActivityOptions, BehaviorGate, Checkpoint, CheckpointRecord, CheckpointStore,
    SignalChannel, VersionStamp,
};
use crate::logging::log_connection_operation;
use crate::models::{
    ConnectionContext, ConnectionRunInput, InternalState, JobInformation, RunState, SyncInput,
};
use crate::retry::RetryManager;
use crate::services::{Collaborators, TimeToWait};

pub struct ConnectionManager {
    pub(super) connection_id: Uuid,
    pub(super) collaborators: Collaborators,
    pub(super) activity_options: ActivityOptions,
    pub(super) restart_delay: Duration,
    pub(super) signals: Arc<SignalChannel>,
    pub(super) internal: InternalState,
    /// Stamp of the checkpoint being executed.
    pub(super) versions: VersionStamp,
    /// Stamp adopted by fresh checkpoints.
    current_versions: VersionStamp,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_id", &self.connection_id)
            .field("internal", &self.internal)
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        connection_id: Uuid,
        collaborators: Collaborators,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            connection_id,
            collaborators,
            activity_options: config.activity.to_options(),
            restart_delay: config.workflow.restart_delay(),
            signals: Arc::new(SignalChannel::new()),
            internal: InternalState::default(),
            versions: VersionStamp::current(),
            current_versions: VersionStamp::current(),
            checkpoint_store: None,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Behaviour stamp for fresh checkpoints and for the next `run_checkpoint`.
    pub fn with_versions(mut self, versions: VersionStamp) -> Self {
        self.versions = versions.clone();
        self.current_versions = versions;
        self
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn handle(&self) -> ConnectionManagerHandle {
        ConnectionManagerHandle::new(self.connection_id, self.signals.clone())
    }

    /// Drive checkpoints until the connection is deleted.
    ///
    /// The first checkpoint replays with the record's behaviour stamp; later
    /// ones adopt the manager's current stamp.
    pub async fn run(&mut self, record: CheckpointRecord) -> OrchestratorResult<()> {
        let connection_id = self.connection_id;
        let mut input = record.input;
        self.versions = record.versions;

        log_connection_operation(
            "control_loop_started",
            Some(connection_id),
            input.job_id,
            Some(input.attempt_number),
            "started",
            None,
        );

        loop {
            self.persist_checkpoint(&input).await;

            let checkpoint = self.run_checkpoint(input).await;
            self.versions = self.current_versions.clone();

            match checkpoint {
                Checkpoint::ContinueAsNew(next) => {
                    debug!(
                        connection_id = %connection_id,
                        job_id = ?next.job_id,
                        attempt_number = next.attempt_number,
                        from_failure = next.from_failure,
                        skip_scheduling = next.skip_scheduling,
                        "Continuing as new"
                    );
                    input = next;
                }
                Checkpoint::Terminate => {
                    self.forget_checkpoint().await;
                    log_connection_operation(
                        "control_loop_terminated",
                        Some(connection_id),
                        None,
                        None,
                        "terminated",
                        None,
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Store failures are retried like any activity. If the store stays
    /// unavailable the loop keeps running on the in-memory input; the record
    /// catches up at the next checkpoint.
    async fn persist_checkpoint(&self, input: &ConnectionRunInput) {
        let Some(store) = self.checkpoint_store.as_deref() else {
            return;
        };
        let record = &CheckpointRecord::new(input.clone(), self.versions.clone());
        let saved = run_activity("save_checkpoint", &self.activity_options, || async move {
            store
                .save(record)
                .await
                .map_err(|error| ServiceError::Unavailable(error.to_string()))
        })
        .await;
        if let Err(error) = saved {
            error!(
                connection_id = %self.connection_id,
                job_id = ?input.job_id,
                error = %error,
                "Checkpoint not persisted, continuing from memory"
            );
        }
    }

    async fn forget_checkpoint(&self) {
        let Some(store) = self.checkpoint_store.as_deref() else {
            return;
        };
        let connection_id = self.connection_id;
        let removed = run_activity("remove_checkpoint", &self.activity_options, || async move {
            store
                .remove(connection_id)
                .await
                .map_err(|error| ServiceError::Unavailable(error.to_string()))
        })
        .await;
        if let Err(error) = removed {
            error!(
                connection_id = %connection_id,
                error = %error,
                "Checkpoint of a deleted connection could not be removed"
            );
        }
    }

    /// Run one checkpoint and return its decision. Transient state is reset
    /// afterwards; signals delivered before the call are honoured.
    pub async fn run_checkpoint(&mut self, input: ConnectionRunInput) -> Checkpoint {
        let checkpoint = match self.execute(input).await {
            Ok(checkpoint) | Err(checkpoint) => checkpoint,
        };
        self.signals.reset();
        self.internal = InternalState::default();
        checkpoint
    }

    async fn execute(&mut self, mut input: ConnectionRunInput) -> Flow<Checkpoint> {
        let connection_id = self.connection_id;
        self.internal = InternalState::from_input(&input);

        if self.versions.is_enabled(BehaviorGate::WorkspaceTombstoneCheck) {
            let tombstoned = self
                .mandatory("is_workspace_tombstoned", || {
                    self.collaborators.schedule.is_workspace_tombstoned(connection_id)
                })
                .await?;
            if tombstoned {
                info!(connection_id = %connection_id, "Workspace is tombstoned, stopping control loop");
                return Ok(Checkpoint::Terminate);
            }
        }

        let context = self
            .mandatory("get_connection_context", || {
                self.collaborators.schedule.get_connection_context(connection_id)
            })
            .await?;

        if self.versions.is_enabled(BehaviorGate::LoadShedBackoff) {
            loop {
                let backoff = self
                    .mandatory("get_load_shed_backoff", || {
                        self.collaborators.schedule.get_load_shed_backoff(&context)
                    })
                    .await?;
                if backoff.is_zero() {
                    break;
                }
                info!(
                    connection_id = %connection_id,
                    backoff_seconds = backoff.as_secs(),
                    "Load shed backoff active, delaying run"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        self.signals.update(|state| {
            state.running |= input.from_failure;
            state.skip_scheduling |= input.skip_scheduling;
        });
        self.publish_job_information();
        self.record_metric(metrics::WORKFLOW_ATTEMPT, self.metric_attributes(Vec::new()))
            .await;

        let scope = self.signals.cancellation_scope();
        let decision = tokio::select! {
            biased;
            result = self.scoped_run(&mut input, &context) => result?,
            _ = scope.cancelled() => None,
        };

        match decision {
            Some(checkpoint) => Ok(checkpoint),
            None => self.finish_interrupted_scope(input).await,
        }
    }

    /// Body of the cancellation scope. `None` means the scope ended without a
    /// decision and the run state decides.
    async fn scoped_run(
        &mut self,
        input: &mut ConnectionRunInput,
        context: &ConnectionContext,
    ) -> Flow<Option<Checkpoint>> {
        let connection_id = self.connection_id;

        if input.job_id.is_none() {
            self.mandatory("ensure_clean_job_state", || {
                self.collaborators.jobs.ensure_clean_job_state(connection_id)
            })
            .await?;
        }

        let retry_manager = self.hydrate_retry_manager(input).await?;
        if let Some(manager) = &retry_manager {
            self.append_to_previous_attempt_log(input, &manager.describe())
                .await;
        }

        let time_to_wait = if input.from_failure {
            let backoff = retry_manager
                .as_ref()
                .map(RetryManager::backoff)
                .unwrap_or(Duration::ZERO);
            if let Some(manager) = retry_manager.as_ref().filter(|_| !backoff.is_zero()) {
                self.append_to_previous_attempt_log(
                    input,
                    &format!("Backoff before next attempt: {}", manager.backoff_string()),
                )
                .await;
            }
            TimeToWait::Duration(backoff)
        } else {
            self.mandatory("get_time_to_wait", || {
                self.collaborators.schedule.get_time_to_wait(connection_id)
            })
            .await?
        };

        debug!(connection_id = %connection_id, time_to_wait = ?time_to_wait, "Waiting for next run");
        let interrupted = self
            .signals
            .wait_until(time_to_wait, RunState::should_interrupt_waiting)
            .await;
        self.signals.update(|state| state.done_waiting = true);

        let state = self.signals.snapshot();
        debug!(connection_id = %connection_id, interrupted = interrupted, state = ?state, "Done waiting");

        if state.deleted {
            return Ok(None);
        }
        if state.updated {
            info!(connection_id = %connection_id, "Connection updated, restarting with fresh configuration");
            input.skip_scheduling |= state.skip_scheduling;
            return Ok(Some(self.prepare_for_next_run(input.clone())));
        }
        if state.cancelled {
            return Ok(None);
        }

        let retry_manager = self.hydrate_retry_manager(input).await?;

        let flags = if self.versions.is_enabled(BehaviorGate::FeatureFlagFetch) {
            self.with_fallback("get_feature_flags", HashMap::new(), || {
                self.collaborators.feature_flags.get_flags(connection_id)
            })
            .await
        } else {
            HashMap::new()
        };

        let job_id = match input.job_id {
            Some(job_id) => job_id,
            None => {
                let is_scheduled = !state.skip_scheduling;
                let job_id = self
                    .mandatory("create_job", || {
                        self.collaborators.jobs.create_job(connection_id, is_scheduled)
                    })
                    .await?;
                input.job_id = Some(job_id);
                self.internal.attempt_number = None;
                job_id
            }
        };
        self.internal.job_id = Some(job_id);

        let attempt_number = self
            .mandatory("create_attempt", || self.collaborators.jobs.create_attempt(job_id))
            .await?;
        self.internal.attempt_number = Some(attempt_number);
        self.publish_job_information();

        self.mandatory("report_job_start", || {
            self.collaborators.jobs.report_job_start(job_id, connection_id)
        })
        .await?;
        self.signals.update(|state| state.running = true);
        log_connection_operation(
            "attempt_started",
            Some(connection_id),
            Some(job_id),
            Some(attempt_number),
            "running",
            None,
        );

        let job_input = self
            .mandatory("generate_job_input", || {
                self.collaborators
                    .jobs
                    .generate_job_input(job_id, attempt_number, connection_id)
            })
            .await?;
        let is_reset = input.reset_connection || job_input.is_reset();

        match self
            .run_check_phase(context, &job_input, is_reset, &flags)
            .await?
        {
            None => {
                self.signals.update(|state| state.cancelled = true);
                return Ok(None);
            }
            Some(checks) if checks.is_failed() => {
                let output = checks.build_failure_output();
                self.internal.failures.extend(output.failures.iter().cloned());
                let checkpoint = self
                    .report_failure(
                        input.clone(),
                        job_id,
                        attempt_number,
                        Some(output),
                        retry_manager,
                        FailureCause::Connection,
                    )
                    .await?;
                return Ok(Some(checkpoint));
            }
            Some(_) => {}
        }

        let sync_input = SyncInput::from_job_input(&job_input, connection_id);
        let execution_id = format!("sync_{job_id}_{attempt_number}");
        let cancellation = self.signals.cancellation_scope().child_token();
        let result = run_nested(
            &execution_id,
            &cancellation,
            self.collaborators.sync.sync(sync_input, cancellation.clone()),
        )
        .await;

        let checkpoint = match result {
            Ok(output) if output.is_cancelled() => {
                self.signals.update(|state| state.cancelled = true);
                return Ok(None);
            }
            Ok(output) if output.is_failed() => {
                if output.failures.is_empty() {
                    self.internal.failures.insert(failures::replication_failure(
                        "The sync failed without reporting a failure reason",
                        job_id,
                        attempt_number,
                    ));
                }
                self.internal.failures.extend(output.failures.iter().cloned());
                self.report_failure(
                    input.clone(),
                    job_id,
                    attempt_number,
                    Some(output),
                    retry_manager,
                    FailureCause::Unknown,
                )
                .await?
            }
            Ok(output) => {
                self.report_success(input.clone(), job_id, attempt_number, output)
                    .await?
            }
            Err(error) if error.is_cancellation() => {
                self.signals.update(|state| state.cancelled = true);
                return Ok(None);
            }
            Err(error) => {
                let cause = match &error {
                    NestedExecutionError::ActivityFailed { .. } => FailureCause::Activity,
                    _ => FailureCause::Workflow,
                };
                warn!(
                    connection_id = %connection_id,
                    job_id = job_id,
                    attempt_number = attempt_number,
                    error = %error,
                    "Sync execution failed"
                );
                self.internal.failures.insert(failures::failure_from_nested_error(
                    &error,
                    job_id,
                    attempt_number,
                ));
                self.report_failure(
                    input.clone(),
                    job_id,
                    attempt_number,
                    None,
                    retry_manager,
                    cause,
                )
                .await?
            }
        };

        Ok(Some(checkpoint))
    }

    /// Decision for a scope that ended through cancellation, deletion or a
    /// cancelled nested execution.
    async fn finish_interrupted_scope(&mut self, mut input: ConnectionRunInput) -> Flow<Checkpoint> {
        let state = self.signals.snapshot();

        if state.deleted {
            if state.running {
                self.report_cancelled().await?;
            }
            info!(connection_id = %self.connection_id, "Connection deleted, terminating control loop");
            return Ok(Checkpoint::Terminate);
        }

        if state.cancelled_for_reset {
            self.report_cancelled().await?;
            input.reset();
            input.skip_scheduling = true;
            return Ok(self.prepare_for_next_run(input));
        }

        if state.cancelled {
            self.report_cancelled().await?;
            input.reset();
            return Ok(self.prepare_for_next_run(input));
        }

        Ok(self.prepare_for_next_run(input))
    }

    /// Final step of every non-terminal path.
    pub(super) fn prepare_for_next_run(&mut self, mut input: ConnectionRunInput) -> Checkpoint {
        self.internal.clear_failures();
        let state = self.signals.snapshot();
        if state.deleted {
            return Checkpoint::Terminate;
        }
        if state.skip_scheduling_next_run {
            input.skip_scheduling = true;
        }
        Checkpoint::ContinueAsNew(input)
    }

    async fn hydrate_retry_manager(&self, input: &ConnectionRunInput) -> Flow<Option<RetryManager>> {
        let connection_id = self.connection_id;
        let job_id = input.job_id;
        self.mandatory("hydrate_retry_state", || {
            self.collaborators.retry_state.hydrate(job_id, connection_id)
        })
        .await
    }

    fn publish_job_information(&self) {
        let info = match (self.internal.job_id, self.internal.attempt_number) {
            (Some(job_id), attempt_number) => JobInformation {
                job_id,
                attempt_number: attempt_number
                    .map(i64::from)
                    .unwrap_or(crate::constants::NON_RUNNING_ATTEMPT_ID),
            },
            (None, _) => JobInformation::non_running(),
        };
        self.signals.set_job_information(info);
    }
}
