//! # Orchestrator Configuration
//!
//! Typed configuration for the connection control loop. Every field carries a
//! default so an empty file (or no file at all) yields a working setup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sync_orchestrator::config::OrchestratorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::load(Some("config/orchestrator.toml"))?;
//! let restart_delay = config.workflow.restart_delay();
//! let options = config.activity.to_options();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::execution::ActivityOptions;
use crate::retry::{BackoffPolicy, RetryManager};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workflow: WorkflowConfig,
    pub activity: ActivityConfig,
    pub retries: RetriesConfig,
}

impl OrchestratorConfig {
    /// Load defaults, then the optional TOML file, then `SYNC_ORCHESTRATOR__*`
    /// environment overrides. The result is validated.
    pub fn load(path: Option<&str>) -> OrchestratorResult<Self> {
        loader::load_config(path)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.activity.max_attempts == 0 {
            return Err(OrchestratorError::Configuration(
                "activity.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.activity.start_to_close_timeout_seconds == 0 {
            return Err(OrchestratorError::Configuration(
                "activity.start_to_close_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.activity.backoff_coefficient < 1.0 {
            return Err(OrchestratorError::Configuration(format!(
                "activity.backoff_coefficient must be >= 1.0, got {}",
                self.activity.backoff_coefficient
            )));
        }
        if self.retries.base < 1 {
            return Err(OrchestratorError::Configuration(
                "retries.base must be at least 1".to_string(),
            ));
        }
        if self.retries.min_interval_seconds > self.retries.max_interval_seconds {
            return Err(OrchestratorError::Configuration(format!(
                "retries.min_interval_seconds ({}) exceeds retries.max_interval_seconds ({})",
                self.retries.min_interval_seconds, self.retries.max_interval_seconds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Delay before restarting a control loop whose mandatory operation failed.
    pub restart_delay_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            restart_delay_seconds: 600,
        }
    }
}

impl WorkflowConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }
}

/// Timeout and retry budget applied to every external operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub start_to_close_timeout_seconds: u64,
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_seconds: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_to_close_timeout_seconds: 120,
            max_attempts: 5,
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            maximum_interval_seconds: 60,
        }
    }
}

impl ActivityConfig {
    pub fn to_options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_secs(self.start_to_close_timeout_seconds),
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            backoff_coefficient: self.backoff_coefficient,
            maximum_interval: Duration::from_secs(self.maximum_interval_seconds),
        }
    }
}

/// Template for freshly created retry managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub enabled: bool,
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub base: u32,
    pub successive_complete_failure_limit: u32,
    pub total_complete_failure_limit: u32,
    pub successive_partial_failure_limit: u32,
    pub total_partial_failure_limit: u32,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_seconds: 10,
            max_interval_seconds: 1800,
            base: 3,
            successive_complete_failure_limit: 5,
            total_complete_failure_limit: 10,
            successive_partial_failure_limit: 1000,
            total_partial_failure_limit: 20,
        }
    }
}

impl RetriesConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.min_interval_seconds),
            Duration::from_secs(self.max_interval_seconds),
            self.base,
        )
    }

    /// A retry manager with zeroed counters and the configured limits.
    pub fn new_manager(&self) -> RetryManager {
        RetryManager::builder()
            .complete_failure_backoff(self.backoff_policy())
            .successive_complete_failure_limit(self.successive_complete_failure_limit)
            .total_complete_failure_limit(self.total_complete_failure_limit)
            .successive_partial_failure_limit(self.successive_partial_failure_limit)
            .total_partial_failure_limit(self.total_partial_failure_limit)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.workflow.restart_delay(), Duration::from_secs(600));
        assert_eq!(config.activity.max_attempts, 5);
        assert_eq!(config.retries.base, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_activity_options_conversion() {
        let options = ActivityConfig::default().to_options();
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(120));
        assert_eq!(options.initial_interval, Duration::from_millis(1000));
        assert_eq!(options.maximum_interval, Duration::from_secs(60));
        assert_eq!(options.max_attempts, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = OrchestratorConfig::default();
        config.activity.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.retries.min_interval_seconds = 3600;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.retries.base = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_manager_uses_configured_limits() {
        let retries = RetriesConfig {
            successive_complete_failure_limit: 2,
            ..RetriesConfig::default()
        };
        let mut manager = retries.new_manager();
        assert!(manager.should_retry());
        manager.increment_failure(false);
        manager.increment_failure(false);
        assert!(!manager.should_retry());
    }
}
