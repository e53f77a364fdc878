//! # Control Surface
//!
//! External mutations of a running connection control loop. Signals may arrive
//! in any phase; each one only flips run-state flags (and, for cancellations,
//! the cancellation scope). The loop reacts at its next suspension point.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::execution::SignalChannel;
use crate::models::{JobInformation, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSignal {
    SubmitManualSync,
    CancelJob,
    DeleteConnection,
    ConnectionUpdated,
    ResetConnection,
    ResetConnectionAndSkipNextScheduling,
}

/// Cloneable address of one connection's control loop.
#[derive(Debug, Clone)]
pub struct ConnectionManagerHandle {
    connection_id: Uuid,
    signals: Arc<SignalChannel>,
}

impl ConnectionManagerHandle {
    pub(crate) fn new(connection_id: Uuid, signals: Arc<SignalChannel>) -> Self {
        Self {
            connection_id,
            signals,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Apply a signal. Returns `false` when the signal was a no-op.
    pub fn deliver(&self, signal: ConnectionSignal) -> bool {
        info!(connection_id = %self.connection_id, signal = ?signal, "Signal received");
        match signal {
            ConnectionSignal::SubmitManualSync => self.submit_manual_sync(),
            ConnectionSignal::CancelJob => self.cancel_job(),
            ConnectionSignal::DeleteConnection => self.delete_connection(),
            ConnectionSignal::ConnectionUpdated => self.connection_updated(),
            ConnectionSignal::ResetConnection => self.reset_connection(),
            ConnectionSignal::ResetConnectionAndSkipNextScheduling => {
                self.reset_connection_and_skip_next_scheduling()
            }
        }
    }

    /// Start a run now. No-op while a run is active.
    pub fn submit_manual_sync(&self) -> bool {
        let applied = self.signals.update(|state| {
            if state.running {
                return false;
            }
            state.skip_scheduling = true;
            true
        });
        if !applied {
            info!(connection_id = %self.connection_id, "Can't schedule a manual sync while a sync is already running");
        }
        applied
    }

    /// Cancel the active run. No-op when nothing is running.
    pub fn cancel_job(&self) -> bool {
        let cancelled = self.signals.update(|state| {
            if !state.running {
                return false;
            }
            state.cancelled = true;
            true
        });
        if cancelled {
            self.signals.cancel_scope();
        } else {
            info!(connection_id = %self.connection_id, "Can't cancel a non-running sync");
        }
        cancelled
    }

    /// Stop the control loop for good, cancelling the active run first.
    pub fn delete_connection(&self) -> bool {
        self.signals.update(|state| state.deleted = true);
        self.cancel_job();
        true
    }

    pub fn connection_updated(&self) -> bool {
        self.signals.update(|state| state.updated = true);
        true
    }

    pub fn reset_connection(&self) -> bool {
        self.reset(false)
    }

    pub fn reset_connection_and_skip_next_scheduling(&self) -> bool {
        self.reset(true)
    }

    fn reset(&self, skip_next_scheduling: bool) -> bool {
        let cancel_for_reset = self.signals.update(|state| {
            if skip_next_scheduling {
                state.skip_scheduling_next_run = true;
            }
            if state.done_waiting {
                state.cancelled_for_reset = true;
                true
            } else {
                state.skip_scheduling = true;
                false
            }
        });
        if cancel_for_reset {
            self.signals.cancel_scope();
        }
        true
    }

    pub fn state(&self) -> RunState {
        self.signals.snapshot()
    }

    pub fn job_information(&self) -> JobInformation {
        self.signals.job_information()
    }
}
