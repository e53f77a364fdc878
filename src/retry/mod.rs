//! Retry policy applied between failed attempts of the same job.

pub mod backoff_policy;
pub mod retry_manager;

pub use backoff_policy::BackoffPolicy;
pub use retry_manager::{RetryManager, RetryManagerBuilder};
