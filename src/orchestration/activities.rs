//! External-operation wrappers used by the control loop.
//!
//! `mandatory` turns an exhausted operation into a restart checkpoint;
//! `with_fallback` turns it into a default value.

use std::future::Future;
use tracing::{debug, info};

use super::connection_manager::ConnectionManager;
use super::failures;
use super::Flow;
use crate::constants::{attributes, metrics};
use crate::error::{ActivityError, ServiceResult};
use crate::execution::{run_activity, Checkpoint};
use crate::logging::log_activity_failure;
use crate::models::{ConnectionRunInput, FailureReasons};
use crate::services::{MetricAttribute, TimeToWait};

impl ConnectionManager {
    /// Run an operation the loop can't proceed without.
    ///
    /// On exhaustion: wait the restart delay (cut short by a delete), report a
    /// platform failure for the current attempt if there is one, and restart
    /// from a fresh input.
    pub(super) async fn mandatory<T, F, Fut>(&self, activity: &'static str, operation: F) -> Flow<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        match run_activity(activity, &self.activity_options, operation).await {
            Ok(value) => Ok(value),
            Err(error) => Err(self.restart_after_failure(error).await),
        }
    }

    async fn restart_after_failure(&self, error: ActivityError) -> Checkpoint {
        let connection_id = self.connection_id;
        log_activity_failure(error.activity(), connection_id, &error.to_string(), true);

        self.signals
            .wait_until(TimeToWait::Duration(self.restart_delay), |state| state.deleted)
            .await;

        if let (Some(job_id), Some(attempt_number)) =
            (self.internal.job_id, self.internal.attempt_number)
        {
            let failures: FailureReasons =
                [failures::platform_failure(&error, job_id, attempt_number)]
                    .into_iter()
                    .collect();
            let summary = failures::failure_summary(&failures, self.internal.partial_success);
            self.with_fallback("report_attempt_failure", (), || {
                self.collaborators.jobs.report_attempt_failure(
                    job_id,
                    attempt_number,
                    connection_id,
                    &summary,
                    None,
                )
            })
            .await;
        }

        self.restart_checkpoint()
    }

    /// Fresh input for a restart. Signals received so far still apply: a
    /// delete terminates, a pending run request or reset skips scheduling.
    fn restart_checkpoint(&self) -> Checkpoint {
        let state = self.signals.snapshot();
        if state.deleted {
            info!(connection_id = %self.connection_id, "Connection deleted during restart, terminating control loop");
            return Checkpoint::Terminate;
        }
        let mut input = ConnectionRunInput::new(self.connection_id);
        input.skip_scheduling =
            state.skip_scheduling || state.skip_scheduling_next_run || state.cancelled_for_reset;
        Checkpoint::ContinueAsNew(input)
    }

    /// Run an operation whose failure only degrades the run.
    pub(super) async fn with_fallback<T, F, Fut>(
        &self,
        activity: &'static str,
        default: T,
        operation: F,
    ) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        match run_activity(activity, &self.activity_options, operation).await {
            Ok(value) => value,
            Err(error) => {
                log_activity_failure(activity, self.connection_id, &error.to_string(), false);
                let labels = [
                    MetricAttribute::new(attributes::CONNECTION_ID, self.connection_id),
                    MetricAttribute::new(attributes::ACTIVITY_NAME, activity),
                ];
                // recorded directly; errors here are dropped
                if let Err(metric_error) = self
                    .collaborators
                    .metrics
                    .record_count(metrics::ACTIVITY_FAILURE, &labels)
                    .await
                {
                    debug!(error = %metric_error, "Unable to record activity failure metric");
                }
                default
            }
        }
    }

    pub(super) async fn record_metric(&self, metric: &'static str, labels: Vec<MetricAttribute>) {
        self.with_fallback("record_metric", (), || {
            self.collaborators.metrics.record_count(metric, &labels)
        })
        .await
    }

    /// Connection, job and attempt labels plus `extra`.
    pub(super) fn metric_attributes(&self, extra: Vec<MetricAttribute>) -> Vec<MetricAttribute> {
        let mut labels = vec![MetricAttribute::new(
            attributes::CONNECTION_ID,
            self.connection_id,
        )];
        if let Some(job_id) = self.internal.job_id {
            labels.push(MetricAttribute::new(attributes::JOB_ID, job_id));
        }
        if let Some(attempt_number) = self.internal.attempt_number {
            labels.push(MetricAttribute::new(attributes::ATTEMPT_NUMBER, attempt_number));
        }
        labels.extend(extra);
        labels
    }

    /// Best-effort line in the current attempt's log. Skipped without a job.
    pub(super) async fn append_to_attempt_log(&self, message: &str) {
        if let (Some(job_id), Some(attempt_number)) =
            (self.internal.job_id, self.internal.attempt_number)
        {
            self.write_attempt_log(job_id, attempt_number, message).await;
        }
    }

    /// Best-effort line in the log of the attempt that failed before this run.
    pub(super) async fn append_to_previous_attempt_log(
        &self,
        input: &ConnectionRunInput,
        message: &str,
    ) {
        let Some(job_id) = input.job_id.filter(|_| input.from_failure) else {
            return;
        };
        let attempt_number = input.internal_attempt_number().saturating_sub(1);
        self.write_attempt_log(job_id, attempt_number, message).await;
    }

    async fn write_attempt_log(&self, job_id: i64, attempt_number: u32, message: &str) {
        self.with_fallback("append_to_attempt_log", (), || {
            self.collaborators
                .jobs
                .append_to_attempt_log(job_id, attempt_number, message)
        })
        .await
    }
}
