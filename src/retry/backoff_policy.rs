use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: step 0 waits nothing, step `n` waits
/// `min * base^(n-1)` capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    #[serde(with = "duration_secs")]
    pub max_interval: Duration,
    pub base: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(1800),
            base: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(min_interval: Duration, max_interval: Duration, base: u32) -> Self {
        Self {
            min_interval,
            max_interval,
            base,
        }
    }

    pub fn backoff(&self, step: u32) -> Duration {
        if step == 0 {
            return Duration::ZERO;
        }
        let factor = (self.base as f64).powi(step.saturating_sub(1).min(i32::MAX as u32) as i32);
        let candidate = self.min_interval.as_secs_f64() * factor;
        if !candidate.is_finite() || candidate >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(candidate)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
