use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the updater, built once at startup and passed to every
/// component by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Coins a single successful thief can carry home.
    pub thief_capacity: i64,
    /// Thief movement speed in map tiles per second.
    pub thief_speed: f64,
    /// How long one lock acquisition attempt may wait.
    pub lock_timeout_ms: u64,
    /// Lock acquisition attempts per user commit before giving up.
    pub lock_attempts: u32,
    /// Backoff before the second attempt; doubles after each further failure.
    pub lock_backoff_ms: u64,
    /// Upper bound for any single store round-trip.
    pub store_timeout_ms: u64,
    /// Sorted-set key of the "next due" scheduling index.
    pub schedule_key: String,
    /// Delay before a user whose tick failed is offered to workers again.
    pub retry_delay_ms: u64,
    /// Retention window for metric time series.
    pub metrics_retention_ms: i64,
}

impl UpdaterConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Retry delay in nanoseconds, saturating at `i64::MAX`.
    pub fn retry_delay_nanos(&self) -> i64 {
        i64::try_from(self.retry_delay_ms)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000_000)
    }

    /// Backoff to sleep after the given (1-based) failed attempt.
    pub fn lock_backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 1u64 << failed_attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.lock_backoff_ms.saturating_mul(factor))
    }

    /// Parse a JSON config; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            thief_capacity: 10,
            thief_speed: 0.05,
            lock_timeout_ms: 2_000,
            lock_attempts: 3,
            lock_backoff_ms: 100,
            store_timeout_ms: 5_000,
            schedule_key: "user_updates".to_string(),
            retry_delay_ms: 10_000,
            metrics_retention_ms: 7 * 24 * 60 * 60 * 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = UpdaterConfig::from_json(r#"{ "thief_capacity": 25 }"#).unwrap();
        assert_eq!(config.thief_capacity, 25);
        assert_eq!(config.lock_attempts, UpdaterConfig::default().lock_attempts);
        assert_eq!(config.schedule_key, "user_updates");
    }

    #[test]
    fn backoff_doubles() {
        let config = UpdaterConfig {
            lock_backoff_ms: 10,
            ..UpdaterConfig::default()
        };
        assert_eq!(config.lock_backoff(1), Duration::from_millis(10));
        assert_eq!(config.lock_backoff(2), Duration::from_millis(20));
        assert_eq!(config.lock_backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn retry_delay_saturates() {
        let config = UpdaterConfig {
            retry_delay_ms: u64::MAX,
            ..UpdaterConfig::default()
        };
        assert_eq!(config.retry_delay_nanos(), i64::MAX);
        assert_eq!(UpdaterConfig::default().retry_delay_nanos(), 10_000_000_000);
    }
}
