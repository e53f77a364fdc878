//! # Connection Orchestration
//!
//! The per-connection control loop and everything it decides.
//!
//! ## Components
//!
//! - **ConnectionManager**: one connection's durable loop; each pass is a
//!   checkpoint that ends in a restart with an explicit input or termination
//! - **ConnectionManagerHandle**: signal delivery and state queries
//! - **Check phase**: source and destination checks before a sync
//! - **Failures**: failure reasons and metric causes for failed attempts
//! - **ConnectionSupervisor**: one loop per connection, resumable from
//!   persisted checkpoints
//!
//! Internally every step returns a [`Flow`]: `Err` carries the checkpoint that
//! ends the current pass early, so `?` propagates a restart after an exhausted
//! mandatory operation.

mod activities;
pub mod check_phase;
pub mod connection_manager;
pub mod control;
pub mod failures;
mod outcome;
pub mod supervisor;

pub use check_phase::SyncCheckConnectionResult;
pub use connection_manager::ConnectionManager;
pub use control::{ConnectionManagerHandle, ConnectionSignal};
pub use failures::FailureCause;
pub use supervisor::{ConnectionSupervisor, SupervisorStats};

use crate::execution::Checkpoint;

/// Result of a control-loop step. `Err` ends the checkpoint with the carried
/// decision.
pub type Flow<T> = Result<T, Checkpoint>;
