//! # Execution Substrate
//!
//! The durable-execution primitives the control loop is written against:
//! external operations with their own timeout and retry budget, signals with
//! interruptible waits and a cancellation scope, nested executions, and
//! checkpoint records that let a restarted process resume a connection.

pub mod activity;
pub mod checkpoint;
pub mod nested;
pub mod signals;
pub mod versioning;

pub use activity::{run_activity, ActivityOptions};
pub use checkpoint::{
    Checkpoint, CheckpointRecord, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use nested::{run_nested, CheckExecution, SyncExecution};
pub use signals::SignalChannel;
pub use versioning::{BehaviorGate, VersionStamp};
