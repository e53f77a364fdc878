//! Failure reasons and attempt failure summaries.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Source,
    Destination,
    Replication,
    Workflow,
    Activity,
    Unknown,
}

/// What kind of failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Misconfiguration that a retry cannot fix.
    ConfigError,
    SystemError,
    TransientError,
    ManualCancellation,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureOrigin::Source => "source",
            FailureOrigin::Destination => "destination",
            FailureOrigin::Replication => "replication",
            FailureOrigin::Workflow => "workflow",
            FailureOrigin::Activity => "activity",
            FailureOrigin::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub failure_origin: Option<FailureOrigin>,
    pub failure_type: Option<FailureType>,
    pub internal_message: Option<String>,
    pub external_message: Option<String>,
    pub stacktrace: Option<String>,
    pub retryable: Option<bool>,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for FailureReason {
    fn default() -> Self {
        Self {
            failure_origin: None,
            failure_type: None,
            internal_message: None,
            external_message: None,
            stacktrace: None,
            retryable: None,
            timestamp: Utc::now().timestamp_millis(),
            metadata: BTreeMap::new(),
        }
    }
}

impl FailureReason {
    pub fn new(origin: FailureOrigin) -> Self {
        Self {
            failure_origin: Some(origin),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = Some(failure_type);
        self
    }

    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    pub fn with_external_message(mut self, message: impl Into<String>) -> Self {
        self.external_message = Some(message.into());
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_config_error(&self) -> bool {
        self.failure_type == Some(FailureType::ConfigError)
    }
}

/// Failure reasons accumulated during one job attempt. Duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureReasons(Vec<FailureReason>);

impl FailureReasons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reason unless an equal one is already present.
    pub fn insert(&mut self, reason: FailureReason) -> bool {
        if self.0.contains(&reason) {
            return false;
        }
        self.0.push(reason);
        true
    }

    pub fn extend<I: IntoIterator<Item = FailureReason>>(&mut self, reasons: I) {
        for reason in reasons {
            self.insert(reason);
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailureReason> {
        self.0.iter()
    }

    /// First configuration error among the reasons.
    pub fn config_error(&self) -> Option<&FailureReason> {
        self.0.iter().find(|reason| reason.is_config_error())
    }

    /// Reasons ordered by timestamp.
    pub fn ordered(&self) -> Vec<FailureReason> {
        let mut reasons = self.0.clone();
        reasons.sort_by_key(|reason| reason.timestamp);
        reasons
    }
}

impl FromIterator<FailureReason> for FailureReasons {
    fn from_iter<I: IntoIterator<Item = FailureReason>>(iter: I) -> Self {
        let mut reasons = FailureReasons::new();
        reasons.extend(iter);
        reasons
    }
}

/// Payload carried by terminal failure and cancellation reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailureSummary {
    pub failures: Vec<FailureReason>,
    pub partial_success: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons_dedupe() {
        let reason = FailureReason::new(FailureOrigin::Source)
            .with_type(FailureType::SystemError)
            .with_timestamp(10);

        let mut reasons = FailureReasons::new();
        assert!(reasons.insert(reason.clone()));
        assert!(!reasons.insert(reason));
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn test_ordered_by_timestamp() {
        let late = FailureReason::new(FailureOrigin::Destination).with_timestamp(200);
        let early = FailureReason::new(FailureOrigin::Source).with_timestamp(100);
        let reasons: FailureReasons = vec![late, early].into_iter().collect();

        let ordered = reasons.ordered();
        assert_eq!(ordered[0].failure_origin, Some(FailureOrigin::Source));
        assert_eq!(ordered[1].failure_origin, Some(FailureOrigin::Destination));
    }

    #[test]
    fn test_config_error_found_anywhere() {
        let reasons: FailureReasons = vec![
            FailureReason::new(FailureOrigin::Replication).with_type(FailureType::SystemError),
            FailureReason::new(FailureOrigin::Source)
                .with_type(FailureType::ConfigError)
                .with_internal_message("bad credentials"),
        ]
        .into_iter()
        .collect();

        let config_error = reasons.config_error().unwrap();
        assert_eq!(config_error.internal_message.as_deref(), Some("bad credentials"));
    }
}
