//! Reporting a finished attempt: success, failure with the retry decision,
//! and cancellation.

use tracing::{info, warn};

use super::connection_manager::ConnectionManager;
use super::failures::{self, FailureCause};
use super::Flow;
use crate::constants::{attributes, metrics};
use crate::execution::Checkpoint;
use crate::logging::log_connection_operation;
use crate::models::{ConnectionRunInput, RunOutcome, SyncOutput};
use crate::retry::RetryManager;
use crate::services::MetricAttribute;

impl ConnectionManager {
    pub(super) async fn report_success(
        &mut self,
        mut input: ConnectionRunInput,
        job_id: i64,
        attempt_number: u32,
        output: SyncOutput,
    ) -> Flow<Checkpoint> {
        let connection_id = self.connection_id;
        self.signals.update(|state| state.set_outcome(RunOutcome::Success));

        self.mandatory("report_job_success", || {
            self.collaborators
                .jobs
                .report_job_success(job_id, attempt_number, connection_id, &output)
        })
        .await?;
        self.mandatory("delete_stream_reset_records", || {
            self.collaborators
                .jobs
                .delete_stream_reset_records(job_id, connection_id)
        })
        .await?;

        self.record_metric(metrics::WORKFLOW_SUCCESS, self.metric_attributes(Vec::new()))
            .await;
        log_connection_operation(
            "job_succeeded",
            Some(connection_id),
            Some(job_id),
            Some(attempt_number),
            "succeeded",
            Some(&format!("records_committed={}", output.records_committed())),
        );

        input.reset();
        Ok(self.prepare_for_next_run(input))
    }

    /// Report the attempt and decide between another attempt and a terminal
    /// job failure.
    ///
    /// A retry manager makes the decision when one is available, the attempt
    /// ceiling otherwise. A configuration error among the failures is always
    /// terminal.
    pub(super) async fn report_failure(
        &mut self,
        mut input: ConnectionRunInput,
        job_id: i64,
        attempt_number: u32,
        output: Option<SyncOutput>,
        retry_manager: Option<RetryManager>,
        cause: FailureCause,
    ) -> Flow<Checkpoint> {
        let connection_id = self.connection_id;
        self.signals.update(|state| state.set_outcome(RunOutcome::Failed));

        let partial_success = output
            .as_ref()
            .map(|output| output.records_committed() > 0);
        self.internal.partial_success = partial_success;
        let summary = failures::failure_summary(&self.internal.failures, partial_success);

        self.mandatory("report_attempt_failure", || {
            self.collaborators.jobs.report_attempt_failure(
                job_id,
                attempt_number,
                connection_id,
                &summary,
                output.as_ref(),
            )
        })
        .await?;

        let made_progress = self
            .with_fallback("check_progress", false, || {
                self.collaborators
                    .progress
                    .check_progress(job_id, attempt_number, connection_id)
            })
            .await;

        let within_budget = match retry_manager {
            Some(mut manager) => {
                manager.increment_failure(made_progress);
                self.mandatory("persist_retry_state", || {
                    self.collaborators
                        .retry_state
                        .persist(job_id, connection_id, &manager)
                })
                .await?;
                manager.should_retry()
            }
            None => {
                let max_attempts = self
                    .mandatory("get_max_attempts", || {
                        self.collaborators.schedule.get_max_attempts()
                    })
                    .await?;
                input.attempt_number < max_attempts
            }
        };

        let config_error = self.internal.failures.config_error().cloned();
        let will_retry = within_budget && config_error.is_none();

        if made_progress {
            self.record_metric(
                metrics::MADE_PROGRESS,
                self.metric_attributes(vec![MetricAttribute::new(
                    attributes::WILL_RETRY,
                    will_retry,
                )]),
            )
            .await;
        }

        if will_retry {
            info!(
                connection_id = %connection_id,
                job_id = job_id,
                attempt_number = input.attempt_number,
                cause = %cause,
                "Attempt failed, scheduling another attempt"
            );
            input.advance_attempt();
            // the retry waits on the backoff, never on a stale manual trigger
            input.skip_scheduling = false;
            return Ok(self.prepare_for_next_run(input));
        }

        let reason = match &config_error {
            Some(reason) => reason
                .internal_message
                .clone()
                .unwrap_or_else(|| "Connection configuration error".to_string()),
            None => format!("Job failed after too many retries for connection {connection_id}"),
        };
        self.fail_job(&input, job_id, &reason).await?;

        self.record_metric(
            metrics::WORKFLOW_FAILURE,
            self.metric_attributes(vec![
                MetricAttribute::new(attributes::FAILURE_CAUSE, cause),
                MetricAttribute::new(attributes::MADE_PROGRESS, made_progress),
            ]),
        )
        .await;

        input.reset();
        Ok(self.prepare_for_next_run(input))
    }

    async fn fail_job(&self, input: &ConnectionRunInput, job_id: i64, reason: &str) -> Flow<()> {
        let connection_id = self.connection_id;
        let attempt_number = input.attempt_number;

        self.append_to_attempt_log(&format!("Failing job: {reason}")).await;
        self.mandatory("report_job_failure", || {
            self.collaborators
                .jobs
                .report_job_failure(job_id, attempt_number, connection_id, reason)
        })
        .await?;

        let disabled = self
            .mandatory("auto_disable_connection", || {
                self.collaborators.auto_disable.evaluate_and_disable(connection_id)
            })
            .await?;
        if disabled {
            warn!(connection_id = %connection_id, "Connection disabled after repeated failures");
        }

        log_connection_operation(
            "job_failed",
            Some(connection_id),
            Some(job_id),
            Some(attempt_number),
            "failed",
            Some(reason),
        );
        Ok(())
    }

    /// Report the current job as cancelled, if there is one.
    pub(super) async fn report_cancelled(&mut self) -> Flow<()> {
        let connection_id = self.connection_id;

        if let Some(job_id) = self.internal.job_id {
            let attempt_number = self.internal.attempt_number.unwrap_or(0);
            let summary = failures::failure_summary_for_cancellation(
                &self.internal.failures,
                self.internal.partial_success,
                job_id,
                attempt_number,
            );
            self.mandatory("report_job_cancelled", || {
                self.collaborators.jobs.report_job_cancelled(
                    job_id,
                    attempt_number,
                    connection_id,
                    &summary,
                )
            })
            .await?;
            log_connection_operation(
                "job_cancelled",
                Some(connection_id),
                Some(job_id),
                Some(attempt_number),
                "cancelled",
                None,
            );
        }

        self.signals.update(|state| state.set_outcome(RunOutcome::Cancelled));
        self.record_metric(
            metrics::WORKFLOW_FAILURE,
            self.metric_attributes(vec![MetricAttribute::new(
                attributes::FAILURE_CAUSE,
                FailureCause::Canceled,
            )]),
        )
        .await;
        Ok(())
    }
}
