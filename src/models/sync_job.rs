//! Inputs and outputs of the nested check and sync executions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{ConnectionContext, FailureReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Source,
    Destination,
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorType::Source => f.write_str("source"),
            ActorType::Destination => f.write_str("destination"),
        }
    }
}

/// Identifies the job attempt a nested execution works for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunConfig {
    pub job_id: i64,
    pub attempt_id: u32,
}

/// How to launch one connector container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub job_id: i64,
    pub attempt_id: u32,
    pub connection_id: Uuid,
    pub docker_image: String,
    /// The launcher belongs to a reset job.
    #[serde(default)]
    pub is_reset: bool,
}

/// Configuration needed to check one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConnectionInput {
    pub actor_id: Uuid,
    pub connection_configuration: serde_json::Value,
}

/// Everything the job service prepares for an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub job_run_config: JobRunConfig,
    pub source_launcher: LauncherConfig,
    pub destination_launcher: LauncherConfig,
    pub sync_config: serde_json::Value,
    pub source_check: Option<CheckConnectionInput>,
    pub destination_check: Option<CheckConnectionInput>,
}

impl JobInput {
    pub fn is_reset(&self) -> bool {
        self.source_launcher.is_reset
    }
}

/// Input of the nested sync execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncInput {
    pub job_run_config: JobRunConfig,
    pub source_launcher: LauncherConfig,
    pub destination_launcher: LauncherConfig,
    pub sync_config: serde_json::Value,
    pub connection_id: Uuid,
}

impl SyncInput {
    pub fn from_job_input(job_input: &JobInput, connection_id: Uuid) -> Self {
        Self {
            job_run_config: job_input.job_run_config,
            source_launcher: job_input.source_launcher.clone(),
            destination_launcher: job_input.destination_launcher.clone(),
            sync_config: job_input.sync_config.clone(),
            connection_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub status: ReplicationStatus,
    pub records_committed: Option<u64>,
    pub bytes_committed: Option<u64>,
}

/// Output of the nested sync execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOutput {
    pub summary: Option<SyncSummary>,
    #[serde(default)]
    pub failures: Vec<FailureReason>,
}

impl SyncOutput {
    pub fn succeeded(records_committed: u64) -> Self {
        Self::with_status(ReplicationStatus::Succeeded, records_committed, Vec::new())
    }

    pub fn failed(records_committed: u64, failures: Vec<FailureReason>) -> Self {
        Self::with_status(ReplicationStatus::Failed, records_committed, failures)
    }

    pub fn cancelled() -> Self {
        Self::with_status(ReplicationStatus::Cancelled, 0, Vec::new())
    }

    fn with_status(
        status: ReplicationStatus,
        records_committed: u64,
        failures: Vec<FailureReason>,
    ) -> Self {
        Self {
            summary: Some(SyncSummary {
                status,
                records_committed: Some(records_committed),
                bytes_committed: None,
            }),
            failures,
        }
    }

    pub fn status(&self) -> Option<ReplicationStatus> {
        self.summary.as_ref().map(|summary| summary.status)
    }

    /// Failed when the summary says so or any failure reason is attached.
    pub fn is_failed(&self) -> bool {
        self.status() == Some(ReplicationStatus::Failed) || !self.failures.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == Some(ReplicationStatus::Cancelled)
    }

    pub fn records_committed(&self) -> u64 {
        self.summary
            .as_ref()
            .and_then(|summary| summary.records_committed)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Succeeded,
    Failed,
}

/// Output of a connection check for one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckConnectionOutput {
    pub status: Option<CheckStatus>,
    pub message: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

impl CheckConnectionOutput {
    pub fn succeeded() -> Self {
        Self {
            status: Some(CheckStatus::Succeeded),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(CheckStatus::Failed),
            message: Some(message.into()),
            failure_reason: None,
        }
    }

    pub fn failed_with_reason(reason: FailureReason) -> Self {
        Self {
            status: Some(CheckStatus::Failed),
            message: reason.external_message.clone(),
            failure_reason: Some(reason),
        }
    }

    /// A check fails on an explicit failed status or an attached failure reason.
    pub fn is_failed(&self) -> bool {
        self.status == Some(CheckStatus::Failed) || self.failure_reason.is_some()
    }
}

/// Actor identity passed along with a check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_type: ActorType,
    pub actor_id: Uuid,
    pub actor_definition_id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub organization_id: Uuid,
}

impl ActorContext {
    pub fn for_actor(actor_type: ActorType, context: &ConnectionContext) -> Self {
        let (actor_id, actor_definition_id) = match actor_type {
            ActorType::Source => (context.source_id, context.source_definition_id),
            ActorType::Destination => (context.destination_id, context.destination_definition_id),
        };
        Self {
            actor_type,
            actor_id,
            actor_definition_id,
            workspace_id: context.workspace_id,
            organization_id: context.organization_id,
        }
    }
}

/// One check to run, independent of the strategy that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub job_run_config: JobRunConfig,
    pub actor_context: ActorContext,
    /// Launcher and connector configuration, present for the nested check strategy.
    pub launcher: Option<LauncherConfig>,
    pub connection_configuration: Option<serde_json::Value>,
}

impl CheckRequest {
    pub fn actor_type(&self) -> ActorType {
        self.actor_context.actor_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureOrigin;

    #[test]
    fn test_sync_output_status() {
        let output = SyncOutput::succeeded(10);
        assert!(!output.is_failed());
        assert!(!output.is_cancelled());
        assert_eq!(output.records_committed(), 10);

        let output = SyncOutput::failed(3, vec![FailureReason::new(FailureOrigin::Source)]);
        assert!(output.is_failed());
        assert_eq!(output.records_committed(), 3);

        assert!(SyncOutput::cancelled().is_cancelled());
        assert_eq!(SyncOutput::default().records_committed(), 0);
    }

    #[test]
    fn test_failure_reasons_mark_output_failed() {
        let mut output = SyncOutput::succeeded(0);
        output.failures.push(FailureReason::new(FailureOrigin::Destination));
        assert!(output.is_failed());
    }

    #[test]
    fn test_check_output_failed() {
        assert!(!CheckConnectionOutput::succeeded().is_failed());
        assert!(CheckConnectionOutput::failed("bad password").is_failed());
        assert!(!CheckConnectionOutput::default().is_failed());
    }

    #[test]
    fn test_actor_context_picks_actor_ids() {
        let context = ConnectionContext::generate(Uuid::new_v4());
        let source = ActorContext::for_actor(ActorType::Source, &context);
        let destination = ActorContext::for_actor(ActorType::Destination, &context);
        assert_eq!(source.actor_id, context.source_id);
        assert_eq!(destination.actor_id, context.destination_id);
        assert_eq!(destination.workspace_id, context.workspace_id);
    }
}
