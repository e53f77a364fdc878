//! # In-Memory Job Tracker
//!
//! Reference [`JobService`] keeping jobs, attempts, attempt logs and pending
//! stream resets in process memory.
//!
//! Terminal reports are idempotent: each carries a [`ReportKey`] and a key is
//! applied at most once, so an activity retry after a lost response never
//! produces a duplicate record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use super::JobService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    AttemptFailureSummary, CheckConnectionInput, JobInput, JobRunConfig, LauncherConfig,
    SyncOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Success,
    AttemptFailure,
    JobFailure,
    Cancelled,
}

/// Identity of one report; applying the same key twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportKey {
    pub job_id: i64,
    pub attempt_number: u32,
    pub kind: ReportKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAttempt {
    pub attempt_number: u32,
    pub status: JobStatus,
    pub failure_summary: Option<AttemptFailureSummary>,
    pub output: Option<SyncOutput>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job_id: i64,
    pub connection_id: Uuid,
    pub is_scheduled: bool,
    pub status: JobStatus,
    pub attempts: Vec<TrackedAttempt>,
    pub failure_reason: Option<String>,
    pub is_reset: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryJobTracker {
    next_job_id: AtomicI64,
    jobs: DashMap<i64, TrackedJob>,
    applied: DashSet<ReportKey>,
    pending_resets: DashMap<Uuid, Vec<String>>,
}

impl InMemoryJobTracker {
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn job(&self, job_id: i64) -> Option<TrackedJob> {
        self.jobs.get(&job_id).map(|entry| entry.clone())
    }

    /// Jobs of a connection, oldest first.
    pub fn jobs_for_connection(&self, connection_id: Uuid) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.connection_id == connection_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.job_id);
        jobs
    }

    pub fn count_with_status(&self, connection_id: Uuid, status: JobStatus) -> usize {
        self.jobs_for_connection(connection_id)
            .iter()
            .filter(|job| job.status == status)
            .count()
    }

    /// Mark streams of a connection for reset; the next job becomes a reset job.
    pub fn request_stream_reset(&self, connection_id: Uuid, streams: Vec<String>) {
        self.pending_resets
            .entry(connection_id)
            .or_default()
            .extend(streams);
    }

    pub fn pending_stream_resets(&self, connection_id: Uuid) -> Vec<String> {
        self.pending_resets
            .get(&connection_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Claim a report key. Returns `false` if it was already applied.
    fn claim(&self, job_id: i64, attempt_number: u32, kind: ReportKind) -> bool {
        let claimed = self.applied.insert(ReportKey {
            job_id,
            attempt_number,
            kind,
        });
        if !claimed {
            debug!(job_id = job_id, attempt_number = attempt_number, kind = ?kind, "Report already applied");
        }
        claimed
    }

    fn with_job<R>(
        &self,
        job_id: i64,
        mutate: impl FnOnce(&mut TrackedJob) -> ServiceResult<R>,
    ) -> ServiceResult<R> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ServiceError::NotFound(format!("job {job_id}")))?;
        mutate(&mut job)
    }

    fn attempt_mut(job: &mut TrackedJob, attempt_number: u32) -> ServiceResult<&mut TrackedAttempt> {
        let job_id = job.job_id;
        job.attempts
            .iter_mut()
            .find(|attempt| attempt.attempt_number == attempt_number)
            .ok_or_else(|| ServiceError::NotFound(format!("attempt {attempt_number} of job {job_id}")))
    }

    fn launcher(job_id: i64, attempt_id: u32, connection_id: Uuid, image: &str, is_reset: bool) -> LauncherConfig {
        LauncherConfig {
            job_id,
            attempt_id,
            connection_id,
            docker_image: image.to_string(),
            is_reset,
        }
    }
}

#[async_trait]
impl JobService for InMemoryJobTracker {
    async fn create_job(&self, connection_id: Uuid, is_scheduled: bool) -> ServiceResult<i64> {
        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let is_reset = !self.pending_stream_resets(connection_id).is_empty();
        self.jobs.insert(
            job_id,
            TrackedJob {
                job_id,
                connection_id,
                is_scheduled,
                status: JobStatus::Pending,
                attempts: Vec::new(),
                failure_reason: None,
                is_reset,
                created_at: Utc::now(),
            },
        );
        info!(job_id = job_id, connection_id = %connection_id, is_reset = is_reset, "Job created");
        Ok(job_id)
    }

    async fn create_attempt(&self, job_id: i64) -> ServiceResult<u32> {
        self.with_job(job_id, |job| {
            if job.status.is_terminal() {
                return Err(ServiceError::Rejected(format!(
                    "job {job_id} is already {:?}",
                    job.status
                )));
            }
            let attempt_number = job.attempts.len() as u32;
            job.attempts.push(TrackedAttempt {
                attempt_number,
                status: JobStatus::Running,
                failure_summary: None,
                output: None,
                log: Vec::new(),
            });
            Ok(attempt_number)
        })
    }

    async fn report_job_start(&self, job_id: i64, _connection_id: Uuid) -> ServiceResult<()> {
        self.with_job(job_id, |job| {
            if !job.status.is_terminal() {
                job.status = JobStatus::Running;
            }
            Ok(())
        })
    }

    async fn report_job_success(
        &self,
        job_id: i64,
        attempt_number: u32,
        _connection_id: Uuid,
        output: &SyncOutput,
    ) -> ServiceResult<()> {
        if !self.claim(job_id, attempt_number, ReportKind::Success) {
            return Ok(());
        }
        self.with_job(job_id, |job| {
            job.status = JobStatus::Succeeded;
            let attempt = Self::attempt_mut(job, attempt_number)?;
            attempt.status = JobStatus::Succeeded;
            attempt.output = Some(output.clone());
            Ok(())
        })
    }

    async fn report_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        _connection_id: Uuid,
        summary: &AttemptFailureSummary,
        output: Option<&SyncOutput>,
    ) -> ServiceResult<()> {
        if !self.claim(job_id, attempt_number, ReportKind::AttemptFailure) {
            return Ok(());
        }
        self.with_job(job_id, |job| {
            let attempt = Self::attempt_mut(job, attempt_number)?;
            attempt.status = JobStatus::Failed;
            attempt.failure_summary = Some(summary.clone());
            attempt.output = output.cloned();
            Ok(())
        })
    }

    async fn report_job_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        _connection_id: Uuid,
        reason: &str,
    ) -> ServiceResult<()> {
        if !self.claim(job_id, attempt_number, ReportKind::JobFailure) {
            return Ok(());
        }
        self.with_job(job_id, |job| {
            job.status = JobStatus::Failed;
            job.failure_reason = Some(reason.to_string());
            Ok(())
        })
    }

    async fn report_job_cancelled(
        &self,
        job_id: i64,
        attempt_number: u32,
        _connection_id: Uuid,
        summary: &AttemptFailureSummary,
    ) -> ServiceResult<()> {
        if !self.claim(job_id, attempt_number, ReportKind::Cancelled) {
            return Ok(());
        }
        self.with_job(job_id, |job| {
            job.status = JobStatus::Cancelled;
            if let Ok(attempt) = Self::attempt_mut(job, attempt_number) {
                attempt.status = JobStatus::Cancelled;
                attempt.failure_summary = Some(summary.clone());
            }
            Ok(())
        })
    }

    async fn ensure_clean_job_state(&self, connection_id: Uuid) -> ServiceResult<()> {
        for mut entry in self.jobs.iter_mut() {
            let job = entry.value_mut();
            if job.connection_id != connection_id || job.status.is_terminal() {
                continue;
            }
            info!(job_id = job.job_id, connection_id = %connection_id, "Failing orphaned job");
            job.status = JobStatus::Failed;
            job.failure_reason = Some("Failing job in order to start from clean job state".to_string());
            for attempt in job.attempts.iter_mut() {
                if !attempt.status.is_terminal() {
                    attempt.status = JobStatus::Failed;
                }
            }
        }
        Ok(())
    }

    async fn is_last_job_or_attempt_failure(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<bool> {
        if attempt_number > 0 {
            return Ok(true);
        }
        let previous = self
            .jobs_for_connection(connection_id)
            .into_iter()
            .filter(|job| job.job_id < job_id)
            .last();
        Ok(previous.is_some_and(|job| job.status != JobStatus::Succeeded))
    }

    async fn generate_job_input(
        &self,
        job_id: i64,
        attempt_number: u32,
        connection_id: Uuid,
    ) -> ServiceResult<JobInput> {
        let job = self
            .job(job_id)
            .ok_or_else(|| ServiceError::NotFound(format!("job {job_id}")))?;
        let is_reset = job.is_reset;
        let streams = self.pending_stream_resets(connection_id);

        Ok(JobInput {
            job_run_config: JobRunConfig {
                job_id,
                attempt_id: attempt_number,
            },
            source_launcher: Self::launcher(job_id, attempt_number, connection_id, "source", is_reset),
            destination_launcher: Self::launcher(
                job_id,
                attempt_number,
                connection_id,
                "destination",
                is_reset,
            ),
            sync_config: serde_json::json!({ "streams_to_reset": streams }),
            source_check: Some(CheckConnectionInput {
                actor_id: connection_id,
                connection_configuration: serde_json::json!({}),
            }),
            destination_check: Some(CheckConnectionInput {
                actor_id: connection_id,
                connection_configuration: serde_json::json!({}),
            }),
        })
    }

    async fn delete_stream_reset_records(&self, job_id: i64, connection_id: Uuid) -> ServiceResult<()> {
        if let Some(streams) = self.pending_resets.remove(&connection_id) {
            debug!(job_id = job_id, connection_id = %connection_id, streams = streams.1.len(), "Stream resets cleared");
        }
        Ok(())
    }

    async fn append_to_attempt_log(
        &self,
        job_id: i64,
        attempt_number: u32,
        message: &str,
    ) -> ServiceResult<()> {
        self.with_job(job_id, |job| {
            let attempt = Self::attempt_mut(job, attempt_number)?;
            attempt.log.push(message.to_string());
            Ok(())
        })
    }
}
