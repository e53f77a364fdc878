//! # Failure Classification
//!
//! Why an attempt ended badly, and the failure reasons reported for it.
//!
//! Every constructor stamps the job and attempt into the reason's metadata so a
//! reason can be traced back to its attempt after aggregation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ActivityError, NestedExecutionError};
use crate::models::{
    ActorType, AttemptFailureSummary, CheckConnectionOutput, FailureOrigin, FailureReason,
    FailureReasons, FailureType,
};

/// Cause attached to failure metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// A connection check failed.
    Connection,
    /// An external operation exhausted its retry budget.
    Activity,
    /// The nested sync execution failed for an unclassified reason.
    Workflow,
    /// Cooperative cancellation.
    Canceled,
    Unknown,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Connection => "connection",
            FailureCause::Activity => "activity",
            FailureCause::Workflow => "workflow",
            FailureCause::Canceled => "canceled",
            FailureCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn stamped(reason: FailureReason, job_id: i64, attempt_number: u32) -> FailureReason {
    reason
        .with_metadata("job_id", serde_json::json!(job_id))
        .with_metadata("attempt_number", serde_json::json!(attempt_number))
}

fn actor_origin(actor_type: ActorType) -> FailureOrigin {
    match actor_type {
        ActorType::Source => FailureOrigin::Source,
        ActorType::Destination => FailureOrigin::Destination,
    }
}

/// Reason for a failed connection check. A reason supplied by the connector is
/// kept; otherwise a non-retryable configuration error is built from the
/// check's message.
pub fn check_failure(
    actor_type: ActorType,
    output: &CheckConnectionOutput,
    job_id: i64,
    attempt_number: u32,
) -> FailureReason {
    let origin = actor_origin(actor_type);
    let reason = match &output.failure_reason {
        Some(reason) => FailureReason {
            failure_origin: Some(origin),
            ..reason.clone()
        },
        None => {
            let message = output
                .message
                .clone()
                .unwrap_or_else(|| format!("The {actor_type} connection check failed"));
            FailureReason::new(origin)
                .with_type(FailureType::ConfigError)
                .with_retryable(false)
                .with_external_message(format!(
                    "Checking {actor_type} connection failed - please review this connection's configuration to prevent future syncs from failing"
                ))
                .with_internal_message(message)
        }
    };
    stamped(reason, job_id, attempt_number).with_metadata("from_connection_check", serde_json::json!(true))
}

pub fn replication_failure(message: impl Into<String>, job_id: i64, attempt_number: u32) -> FailureReason {
    stamped(
        FailureReason::new(FailureOrigin::Replication)
            .with_type(FailureType::SystemError)
            .with_external_message("Something went wrong during replication")
            .with_internal_message(message),
        job_id,
        attempt_number,
    )
}

pub fn unknown_origin_failure(message: impl Into<String>, job_id: i64, attempt_number: u32) -> FailureReason {
    stamped(
        FailureReason::new(FailureOrigin::Unknown)
            .with_type(FailureType::SystemError)
            .with_external_message("An unknown failure occurred")
            .with_internal_message(message),
        job_id,
        attempt_number,
    )
}

/// Reason recorded when the control loop restarts after an exhausted operation.
pub fn platform_failure(error: &ActivityError, job_id: i64, attempt_number: u32) -> FailureReason {
    stamped(
        FailureReason::new(FailureOrigin::Workflow)
            .with_type(FailureType::SystemError)
            .with_external_message("Something went wrong within the sync platform")
            .with_internal_message(error.to_string())
            .with_metadata("activity_name", serde_json::json!(error.activity())),
        job_id,
        attempt_number,
    )
}

/// Reason for a nested execution that ended with an error.
pub fn failure_from_nested_error(
    error: &NestedExecutionError,
    job_id: i64,
    attempt_number: u32,
) -> FailureReason {
    let reason = match error {
        NestedExecutionError::ActivityFailed { activity, message, .. } => stamped(
            FailureReason::new(FailureOrigin::Activity)
                .with_type(FailureType::SystemError)
                .with_external_message(format!("Activity {activity} failed"))
                .with_internal_message(message.clone())
                .with_metadata("activity_name", serde_json::json!(activity)),
            job_id,
            attempt_number,
        ),
        NestedExecutionError::Failed { message, .. } => {
            unknown_origin_failure(message.clone(), job_id, attempt_number)
        }
        NestedExecutionError::Cancelled { .. } => stamped(
            FailureReason::new(FailureOrigin::Workflow)
                .with_type(FailureType::ManualCancellation)
                .with_external_message("The sync was cancelled"),
            job_id,
            attempt_number,
        ),
    };
    reason.with_metadata("execution_id", serde_json::json!(error.execution_id()))
}

pub fn failure_summary(failures: &FailureReasons, partial_success: Option<bool>) -> AttemptFailureSummary {
    AttemptFailureSummary {
        failures: failures.ordered(),
        partial_success,
    }
}

/// Summary for a cancelled attempt: the accumulated reasons plus a manual
/// cancellation reason.
pub fn failure_summary_for_cancellation(
    failures: &FailureReasons,
    partial_success: Option<bool>,
    job_id: i64,
    attempt_number: u32,
) -> AttemptFailureSummary {
    let mut failures = failures.clone();
    failures.insert(stamped(
        FailureReason::new(FailureOrigin::Workflow)
            .with_type(FailureType::ManualCancellation)
            .with_external_message("The sync was cancelled"),
        job_id,
        attempt_number,
    ));
    failure_summary(&failures, partial_success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    #[test]
    fn test_check_failure_without_reason_is_config_error() {
        let output = CheckConnectionOutput::failed("invalid password");
        let reason = check_failure(ActorType::Source, &output, 3, 0);

        assert_eq!(reason.failure_origin, Some(FailureOrigin::Source));
        assert!(reason.is_config_error());
        assert_eq!(reason.retryable, Some(false));
        assert_eq!(reason.internal_message.as_deref(), Some("invalid password"));
        assert_eq!(reason.metadata["from_connection_check"], serde_json::json!(true));
        assert_eq!(reason.metadata["job_id"], serde_json::json!(3));
    }

    #[test]
    fn test_check_failure_keeps_connector_reason() {
        let connector_reason = FailureReason::new(FailureOrigin::Unknown)
            .with_type(FailureType::TransientError)
            .with_internal_message("timeout reaching host");
        let output = CheckConnectionOutput::failed_with_reason(connector_reason);

        let reason = check_failure(ActorType::Destination, &output, 3, 1);
        assert_eq!(reason.failure_origin, Some(FailureOrigin::Destination));
        assert_eq!(reason.failure_type, Some(FailureType::TransientError));
        assert!(!reason.is_config_error());
    }

    #[test]
    fn test_nested_error_classification() {
        let activity = NestedExecutionError::ActivityFailed {
            execution_id: "sync_1".into(),
            activity: "replicate".into(),
            message: "worker lost".into(),
        };
        let reason = failure_from_nested_error(&activity, 1, 0);
        assert_eq!(reason.failure_origin, Some(FailureOrigin::Activity));
        assert_eq!(reason.metadata["execution_id"], serde_json::json!("sync_1"));

        let failed = NestedExecutionError::Failed {
            execution_id: "sync_1".into(),
            message: "panic".into(),
        };
        assert_eq!(
            failure_from_nested_error(&failed, 1, 0).failure_origin,
            Some(FailureOrigin::Unknown)
        );
    }

    #[test]
    fn test_platform_failure_names_activity() {
        let error = ActivityError::RetriesExhausted {
            activity: "create_attempt".into(),
            attempts: 5,
            source: ServiceError::Unavailable("db".into()),
        };
        let reason = platform_failure(&error, 8, 2);
        assert_eq!(reason.failure_origin, Some(FailureOrigin::Workflow));
        assert_eq!(reason.metadata["activity_name"], serde_json::json!("create_attempt"));
    }

    #[test]
    fn test_cancellation_summary_adds_manual_cancellation() {
        let mut failures = FailureReasons::new();
        failures.insert(replication_failure("boom", 1, 0).with_timestamp(1));

        let summary = failure_summary_for_cancellation(&failures, Some(true), 1, 0);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.partial_success, Some(true));
        assert!(summary
            .failures
            .iter()
            .any(|reason| reason.failure_type == Some(FailureType::ManualCancellation)));
        assert_eq!(failures.len(), 1);
    }
}
