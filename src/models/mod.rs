//! Data model of the connection control loop.

pub mod connection_context;
pub mod connection_run_input;
pub mod failure_reason;
pub mod internal_state;
pub mod run_state;
pub mod sync_job;

pub use connection_context::ConnectionContext;
pub use connection_run_input::ConnectionRunInput;
pub use failure_reason::{
    AttemptFailureSummary, FailureOrigin, FailureReason, FailureReasons, FailureType,
};
pub use internal_state::InternalState;
pub use run_state::{RunOutcome, RunState};
pub use sync_job::{
    ActorContext, ActorType, CheckConnectionInput, CheckConnectionOutput, CheckRequest,
    CheckStatus, JobInput, JobRunConfig, LauncherConfig, ReplicationStatus, SyncInput,
    SyncOutput, SyncSummary,
};

use serde::{Deserialize, Serialize};

/// Query result describing the job attached to a control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInformation {
    pub job_id: i64,
    pub attempt_number: i64,
}

impl JobInformation {
    pub fn non_running() -> Self {
        Self {
            job_id: crate::constants::NON_RUNNING_JOB_ID,
            attempt_number: crate::constants::NON_RUNNING_ATTEMPT_ID,
        }
    }
}
