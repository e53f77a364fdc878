//! # Retry Manager
//!
//! Adaptive retry policy persisted per `(job, connection)`.
//!
//! Failures are split in two kinds. A *complete* failure made no progress; a
//! *partial* failure committed data before failing. Each kind keeps a
//! successive and a total counter, each with its own limit, and a retry is
//! allowed while every counter is under its limit. Complete failures back off
//! exponentially; partial failures retry immediately because the next attempt
//! resumes from the committed state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::BackoffPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryManager {
    pub complete_failure_backoff: BackoffPolicy,
    pub successive_complete_failure_limit: u32,
    pub total_complete_failure_limit: u32,
    pub successive_partial_failure_limit: u32,
    pub total_partial_failure_limit: u32,
    #[serde(default)]
    pub successive_complete_failures: u32,
    #[serde(default)]
    pub total_complete_failures: u32,
    #[serde(default)]
    pub successive_partial_failures: u32,
    #[serde(default)]
    pub total_partial_failures: u32,
}

impl Default for RetryManager {
    fn default() -> Self {
        RetryManager::builder().build()
    }
}

impl RetryManager {
    pub fn builder() -> RetryManagerBuilder {
        RetryManagerBuilder::default()
    }

    /// Record a failed attempt. A failure of one kind breaks the streak of the other.
    pub fn increment_failure(&mut self, is_partial: bool) {
        if is_partial {
            self.successive_partial_failures += 1;
            self.total_partial_failures += 1;
            self.successive_complete_failures = 0;
        } else {
            self.successive_complete_failures += 1;
            self.total_complete_failures += 1;
            self.successive_partial_failures = 0;
        }
    }

    pub fn should_retry(&self) -> bool {
        self.successive_complete_failures < self.successive_complete_failure_limit
            && self.total_complete_failures < self.total_complete_failure_limit
            && self.successive_partial_failures < self.successive_partial_failure_limit
            && self.total_partial_failures < self.total_partial_failure_limit
    }

    /// Wait before the next attempt. Zero unless the last failure was complete.
    pub fn backoff(&self) -> Duration {
        if self.successive_complete_failures == 0 {
            return Duration::ZERO;
        }
        self.complete_failure_backoff
            .backoff(self.successive_complete_failures)
    }

    /// Human-readable backoff, e.g. `1 minute 30 seconds`.
    pub fn backoff_string(&self) -> String {
        format_duration_words(self.backoff())
    }

    /// One-line description for the attempt log.
    pub fn describe(&self) -> String {
        format!(
            "Retry state: successive complete failures {}/{}, total complete failures {}/{}, \
             successive partial failures {}/{}, total partial failures {}/{}",
            self.successive_complete_failures,
            self.successive_complete_failure_limit,
            self.total_complete_failures,
            self.total_complete_failure_limit,
            self.successive_partial_failures,
            self.successive_partial_failure_limit,
            self.total_partial_failures,
            self.total_partial_failure_limit,
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryManagerBuilder {
    complete_failure_backoff: BackoffPolicy,
    successive_complete_failure_limit: u32,
    total_complete_failure_limit: u32,
    successive_partial_failure_limit: u32,
    total_partial_failure_limit: u32,
}

impl Default for RetryManagerBuilder {
    fn default() -> Self {
        Self {
            complete_failure_backoff: BackoffPolicy::default(),
            successive_complete_failure_limit: 5,
            total_complete_failure_limit: 10,
            successive_partial_failure_limit: 1000,
            total_partial_failure_limit: 20,
        }
    }
}

impl RetryManagerBuilder {
    pub fn complete_failure_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.complete_failure_backoff = policy;
        self
    }

    pub fn successive_complete_failure_limit(mut self, limit: u32) -> Self {
        self.successive_complete_failure_limit = limit;
        self
    }

    pub fn total_complete_failure_limit(mut self, limit: u32) -> Self {
        self.total_complete_failure_limit = limit;
        self
    }

    pub fn successive_partial_failure_limit(mut self, limit: u32) -> Self {
        self.successive_partial_failure_limit = limit;
        self
    }

    pub fn total_partial_failure_limit(mut self, limit: u32) -> Self {
        self.total_partial_failure_limit = limit;
        self
    }

    pub fn build(self) -> RetryManager {
        RetryManager {
            complete_failure_backoff: self.complete_failure_backoff,
            successive_complete_failure_limit: self.successive_complete_failure_limit,
            total_complete_failure_limit: self.total_complete_failure_limit,
            successive_partial_failure_limit: self.successive_partial_failure_limit,
            total_partial_failure_limit: self.total_partial_failure_limit,
            successive_complete_failures: 0,
            total_complete_failures: 0,
            successive_partial_failures: 0,
            total_partial_failures: 0,
        }
    }
}

fn format_duration_words(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    let unit = |value: u64, name: &str| {
        if value == 1 {
            format!("1 {name}")
        } else {
            format!("{value} {name}s")
        }
    };

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(unit(seconds, "second"));
    }
    parts.join(" ")
}
