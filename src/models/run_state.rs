use serde::{Deserialize, Serialize};

/// Transient flags for the lifetime of one checkpoint.
///
/// Written by signal handlers and the control loop; rebuilt from the
/// [`ConnectionRunInput`](super::ConnectionRunInput) at every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub running: bool,
    pub cancelled: bool,
    pub cancelled_for_reset: bool,
    pub deleted: bool,
    pub updated: bool,
    pub skip_scheduling: bool,
    pub skip_scheduling_next_run: bool,
    pub done_waiting: bool,
    pub failed: bool,
    pub success: bool,
}

/// Terminal decision for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether a signal requires the schedule wait to end early.
    pub fn should_interrupt_waiting(&self) -> bool {
        self.skip_scheduling || self.deleted || self.updated || self.cancelled
    }

    /// Record the terminal outcome, clearing the other two.
    pub fn set_outcome(&mut self, outcome: RunOutcome) {
        self.success = outcome == RunOutcome::Success;
        self.failed = outcome == RunOutcome::Failed;
        if outcome == RunOutcome::Cancelled {
            self.cancelled = true;
        }
    }

    /// The outcome when exactly one of success, failed or cancelled is set.
    pub fn outcome(&self) -> Option<RunOutcome> {
        match (self.success, self.failed, self.cancelled) {
            (true, false, false) => Some(RunOutcome::Success),
            (false, true, false) => Some(RunOutcome::Failed),
            (false, false, true) => Some(RunOutcome::Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_flags() {
        let mut state = RunState::default();
        assert!(!state.should_interrupt_waiting());

        state.running = true;
        state.cancelled_for_reset = true;
        assert!(!state.should_interrupt_waiting());

        let mutations: [fn(&mut RunState); 4] = [
            |s| s.skip_scheduling = true,
            |s| s.deleted = true,
            |s| s.updated = true,
            |s| s.cancelled = true,
        ];
        for mutate in mutations {
            let mut state = RunState::default();
            mutate(&mut state);
            assert!(state.should_interrupt_waiting());
        }
    }

    #[test]
    fn test_outcome_is_exclusive() {
        let mut state = RunState::default();
        assert_eq!(state.outcome(), None);

        state.set_outcome(RunOutcome::Failed);
        assert_eq!(state.outcome(), Some(RunOutcome::Failed));

        state.set_outcome(RunOutcome::Success);
        assert_eq!(state.outcome(), Some(RunOutcome::Success));
        assert!(!state.failed);
    }
}
