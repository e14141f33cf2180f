//! Configuration model.
//!
//! Loaded from `config.toml` by the infrastructure layer. Every section has
//! defaults so a missing or partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for draftpane.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DraftPaneConfig {
    pub service: ServiceConfig,
    pub retry: RetryPolicy,
    pub storage: StorageConfig,
}

/// Remote drafting service settings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8787/draft".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounded linear backoff: `delay = min(base * attempt, cap)`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_500,
            max_delay_ms: 10_000,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let millis = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay_ms);
        Some(Duration::from_millis(millis))
    }
}

/// Snapshot persistence settings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub debounce_ms: u64,
    /// Overrides the platform data directory when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            data_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delays_are_linear_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(1_500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(3_000)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(4_500)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.delay_for(0), None);

        let steep = RetryPolicy {
            base_delay_ms: 6_000,
            max_delay_ms: 10_000,
            max_attempts: 3,
        };
        assert_eq!(steep.delay_for(2), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DraftPaneConfig = toml::from_str(
            r#"
            [service]
            endpoint = "https://drafts.example.com/v1/reply"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.service.endpoint, "https://drafts.example.com/v1/reply");
        assert_eq!(config.service.timeout_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_500);
        assert_eq!(config.storage.debounce_ms, 300);
    }
}
