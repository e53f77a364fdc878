use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The explicit state threaded through every checkpoint of a connection's
/// control loop. Nothing else survives a checkpoint.
///
/// `attempt_number` is 1-based. The working counter held in
/// [`InternalState`](super::InternalState) is 0-based and derived with
/// [`ConnectionRunInput::internal_attempt_number`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRunInput {
    pub connection_id: Uuid,
    /// Set once a job is created, cleared on terminal success, failure or cancel.
    pub job_id: Option<i64>,
    pub attempt_number: u32,
    /// Resume from a failed attempt: wait on the retry backoff, not the schedule.
    pub from_failure: bool,
    /// Bypass the schedule wait entirely.
    pub skip_scheduling: bool,
    pub reset_connection: bool,
}

impl ConnectionRunInput {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            job_id: None,
            attempt_number: 1,
            from_failure: false,
            skip_scheduling: false,
            reset_connection: false,
        }
    }

    /// Input for a run that should start without waiting on the schedule.
    pub fn immediate(connection_id: Uuid) -> Self {
        Self {
            skip_scheduling: true,
            ..Self::new(connection_id)
        }
    }

    /// Return to the schedule-wait defaults after a terminal outcome.
    pub fn reset(&mut self) {
        self.job_id = None;
        self.attempt_number = 1;
        self.from_failure = false;
        self.skip_scheduling = false;
    }

    /// Advance to the next attempt of the same job.
    pub fn advance_attempt(&mut self) {
        self.attempt_number += 1;
        self.from_failure = true;
    }

    pub fn internal_attempt_number(&self) -> u32 {
        self.attempt_number.saturating_sub(1)
    }
}
