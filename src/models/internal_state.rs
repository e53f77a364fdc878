use serde::{Deserialize, Serialize};

use super::{ConnectionRunInput, FailureReasons};

/// Working state of the active job attempt. Cleared at every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub job_id: Option<i64>,
    /// 0-based attempt counter reported at attempt level.
    pub attempt_number: Option<u32>,
    pub failures: FailureReasons,
    /// Unknown until the attempt's progress has been checked.
    pub partial_success: Option<bool>,
}

impl InternalState {
    /// Seed from the carried input: the same job, `attempt = input - 1`.
    pub fn from_input(input: &ConnectionRunInput) -> Self {
        Self {
            job_id: input.job_id,
            attempt_number: Some(input.internal_attempt_number()),
            ..Self::default()
        }
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
        self.partial_success = None;
    }
}
