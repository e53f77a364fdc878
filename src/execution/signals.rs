//! # Signal Channel
//!
//! Shared state between a connection's control loop and the tasks delivering
//! signals to it. Every mutation wakes the loop's durable wait; the loop only
//! observes signals at its own suspension points.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::{JobInformation, RunState};
use crate::services::TimeToWait;

#[derive(Debug)]
pub struct SignalChannel {
    state: Mutex<RunState>,
    notify: Notify,
    scope: Mutex<CancellationToken>,
    job: Mutex<JobInformation>,
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            notify: Notify::new(),
            scope: Mutex::new(CancellationToken::new()),
            job: Mutex::new(JobInformation::non_running()),
        }
    }

    /// Mutate the run state and wake any waiter.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut RunState) -> R) -> R {
        let result = {
            let mut state = self.state.lock();
            mutate(&mut state)
        };
        self.notify.notify_waiters();
        result
    }

    pub fn snapshot(&self) -> RunState {
        self.state.lock().clone()
    }

    /// Start a fresh checkpoint: default run state, new cancellation scope,
    /// no job attached.
    pub fn reset(&self) {
        *self.state.lock() = RunState::default();
        *self.scope.lock() = CancellationToken::new();
        *self.job.lock() = JobInformation::non_running();
    }

    /// Token of the current checkpoint's cancellation scope.
    pub fn cancellation_scope(&self) -> CancellationToken {
        self.scope.lock().clone()
    }

    /// Cancel the current cancellation scope.
    pub fn cancel_scope(&self) {
        self.scope.lock().cancel();
        self.notify.notify_waiters();
    }

    pub fn set_job_information(&self, info: JobInformation) {
        *self.job.lock() = info;
    }

    pub fn job_information(&self) -> JobInformation {
        *self.job.lock()
    }

    /// Durable wait: returns `true` as soon as `condition` holds, or the
    /// condition's value once `time_to_wait` has elapsed.
    pub async fn wait_until<F>(&self, time_to_wait: TimeToWait, condition: F) -> bool
    where
        F: Fn(&RunState) -> bool,
    {
        let deadline = match time_to_wait {
            TimeToWait::Duration(duration) => Some(Instant::now() + duration),
            TimeToWait::Indefinite => None,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if condition(&self.state.lock()) {
                return true;
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            return condition(&self.state.lock());
                        }
                    }
                }
                None => notified.await,
            }
        }
    }
}
