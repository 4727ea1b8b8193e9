//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base URL linked from commit statuses.
    pub base_url: String,
    /// Status notifier worker tasks.
    pub notifier_workers: usize,
    /// Status updates buffered before new ones are dropped.
    pub notifier_capacity: usize,
    /// Seconds a claim may stay unfinished before it is reported as stale.
    pub stale_claim_secs: u64,
    /// Seconds between stale-claim scans.
    pub watchdog_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:6010".to_string(),
            notifier_workers: 4,
            notifier_capacity: 1024,
            stale_claim_secs: 3600,
            watchdog_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_stale_claim(mut self, threshold: Duration) -> Self {
        self.stale_claim_secs = threshold.as_secs();
        self
    }

    pub fn notifier(&self) -> NotifierConfig {
        NotifierConfig {
            workers: self.notifier_workers,
            capacity: self.notifier_capacity,
        }
    }

    pub fn stale_claim(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    pub workers: usize,
    pub capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1024,
        }
    }
}

impl NotifierConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = SchedulerConfig::default()
            .with_base_url("https://ci.example.test")
            .with_stale_claim(Duration::from_secs(120));

        assert_eq!(config.base_url, "https://ci.example.test");
        assert_eq!(config.stale_claim(), Duration::from_secs(120));
        assert_eq!(config.watchdog_interval(), Duration::from_secs(60));
        assert_eq!(config.notifier(), NotifierConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: SchedulerConfig = serde_yaml::from_str("notifier_workers: 8\n").unwrap();
        assert_eq!(config.notifier_workers, 8);
        assert_eq!(config.notifier_capacity, 1024);
    }
}
