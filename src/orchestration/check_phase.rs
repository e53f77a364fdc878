//! # Connection Checks
//!
//! Pre-sync checks of the source and destination. Checks only run when the
//! previous job or attempt for the connection failed; a healthy connection goes
//! straight to the sync.
//!
//! The source is checked first and a failure there skips the destination.
//! Reset jobs never check the source. The strategy is either the legacy nested
//! check, which needs the job input's launcher and connector configuration, or
//! the command check, which only needs the actor context. The command check is
//! chosen when its behaviour gate is enabled and the connection's feature flag
//! asks for it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::connection_manager::ConnectionManager;
use super::failures;
use super::Flow;
use crate::constants::flags;
use crate::execution::{run_nested, BehaviorGate, CheckExecution};
use crate::models::{
    ActorContext, ActorType, CheckConnectionOutput, CheckRequest, ConnectionContext, JobInput,
    JobRunConfig, SyncOutput,
};

/// Outcome of the check phase for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCheckConnectionResult {
    job_run_config: JobRunConfig,
    checked: Vec<ActorType>,
    failed: Option<(ActorType, CheckConnectionOutput)>,
}

impl SyncCheckConnectionResult {
    pub fn new(job_run_config: JobRunConfig) -> Self {
        Self {
            job_run_config,
            checked: Vec::new(),
            failed: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn failed_actor(&self) -> Option<ActorType> {
        self.failed.as_ref().map(|(actor_type, _)| *actor_type)
    }

    /// Actors whose check actually ran, in order.
    pub fn checked(&self) -> &[ActorType] {
        &self.checked
    }

    pub fn record(&mut self, actor_type: ActorType, output: CheckConnectionOutput) {
        self.checked.push(actor_type);
        if self.failed.is_none() && output.is_failed() {
            self.failed = Some((actor_type, output));
        }
    }

    /// Failed sync output carrying the check's failure reason.
    pub fn build_failure_output(&self) -> SyncOutput {
        let failures = self
            .failed
            .iter()
            .map(|(actor_type, output)| {
                failures::check_failure(
                    *actor_type,
                    output,
                    self.job_run_config.job_id,
                    self.job_run_config.attempt_id,
                )
            })
            .collect();
        SyncOutput::failed(0, failures)
    }
}

enum CheckAttempt {
    Completed(CheckConnectionOutput),
    Skipped,
    Cancelled,
}

impl ConnectionManager {
    /// `None` when a check was cancelled.
    pub(super) async fn run_check_phase(
        &self,
        context: &ConnectionContext,
        job_input: &JobInput,
        is_reset: bool,
        feature_flags: &HashMap<String, bool>,
    ) -> Flow<Option<SyncCheckConnectionResult>> {
        let connection_id = self.connection_id;
        let job_run_config = job_input.job_run_config;
        let mut result = SyncCheckConnectionResult::new(job_run_config);

        let last_failed = self
            .mandatory("is_last_job_or_attempt_failure", || {
                self.collaborators.jobs.is_last_job_or_attempt_failure(
                    job_run_config.job_id,
                    job_run_config.attempt_id,
                    connection_id,
                )
            })
            .await?;
        if !last_failed {
            info!(
                connection_id = %connection_id,
                job_id = job_run_config.job_id,
                "Last job and attempt succeeded, skipping connection checks"
            );
            return Ok(Some(result));
        }

        let use_command_check = self.versions.is_enabled(BehaviorGate::CommandApiCheck)
            && feature_flags.get(flags::USE_COMMAND_CHECK).copied().unwrap_or(false);
        let strategy: Arc<dyn CheckExecution> = if use_command_check {
            self.collaborators.command_check.clone()
        } else {
            self.collaborators.legacy_check.clone()
        };

        let actors: &[ActorType] = if is_reset {
            debug!(connection_id = %connection_id, "Reset job, skipping source check");
            &[ActorType::Destination]
        } else {
            &[ActorType::Source, ActorType::Destination]
        };

        for actor_type in actors {
            match self
                .run_check(strategy.as_ref(), *actor_type, context, job_input, use_command_check)
                .await
            {
                CheckAttempt::Cancelled => return Ok(None),
                CheckAttempt::Skipped => {}
                CheckAttempt::Completed(output) => {
                    result.record(*actor_type, output);
                    if result.is_failed() {
                        info!(
                            connection_id = %connection_id,
                            actor_type = %actor_type,
                            "Connection check failed"
                        );
                        break;
                    }
                }
            }
        }

        Ok(Some(result))
    }

    async fn run_check(
        &self,
        strategy: &dyn CheckExecution,
        actor_type: ActorType,
        context: &ConnectionContext,
        job_input: &JobInput,
        use_command_check: bool,
    ) -> CheckAttempt {
        let job_run_config = job_input.job_run_config;
        let (launcher, check_input) = match actor_type {
            ActorType::Source => (&job_input.source_launcher, &job_input.source_check),
            ActorType::Destination => (&job_input.destination_launcher, &job_input.destination_check),
        };

        let request = if use_command_check {
            CheckRequest {
                job_run_config,
                actor_context: ActorContext::for_actor(actor_type, context),
                launcher: None,
                connection_configuration: None,
            }
        } else {
            let Some(check_input) = check_input else {
                debug!(actor_type = %actor_type, "No check input, skipping check");
                return CheckAttempt::Skipped;
            };
            CheckRequest {
                job_run_config,
                actor_context: ActorContext::for_actor(actor_type, context),
                launcher: Some(launcher.clone()),
                connection_configuration: Some(check_input.connection_configuration.clone()),
            }
        };

        let execution_id = format!(
            "check_{actor_type}_{}_{}",
            job_run_config.job_id, job_run_config.attempt_id
        );
        let cancellation = self.signals.cancellation_scope().child_token();
        match run_nested(
            &execution_id,
            &cancellation,
            strategy.check(request, cancellation.clone()),
        )
        .await
        {
            Ok(output) => CheckAttempt::Completed(output),
            Err(error) if error.is_cancellation() => CheckAttempt::Cancelled,
            Err(error) => {
                warn!(execution_id = %execution_id, error = %error, "Connection check execution failed");
                CheckAttempt::Completed(CheckConnectionOutput::failed_with_reason(
                    failures::failure_from_nested_error(
                        &error,
                        job_run_config.job_id,
                        job_run_config.attempt_id,
                    ),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureOrigin;

    fn config() -> JobRunConfig {
        JobRunConfig {
            job_id: 4,
            attempt_id: 1,
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let mut result = SyncCheckConnectionResult::new(config());
        result.record(ActorType::Source, CheckConnectionOutput::failed("bad creds"));
        result.record(ActorType::Destination, CheckConnectionOutput::failed("no bucket"));

        assert!(result.is_failed());
        assert_eq!(result.failed_actor(), Some(ActorType::Source));
        assert_eq!(result.checked(), &[ActorType::Source, ActorType::Destination]);
    }

    #[test]
    fn test_failure_output_carries_check_reason() {
        let mut result = SyncCheckConnectionResult::new(config());
        result.record(ActorType::Source, CheckConnectionOutput::succeeded());
        result.record(ActorType::Destination, CheckConnectionOutput::failed("no bucket"));

        let output = result.build_failure_output();
        assert!(output.is_failed());
        assert_eq!(output.records_committed(), 0);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].failure_origin, Some(FailureOrigin::Destination));
        assert!(output.failures[0].is_config_error());
    }

    #[test]
    fn test_successful_checks_are_not_failed() {
        let mut result = SyncCheckConnectionResult::new(config());
        result.record(ActorType::Source, CheckConnectionOutput::succeeded());
        assert!(!result.is_failed());
        assert!(result.build_failure_output().failures.is_empty());
    }
}
