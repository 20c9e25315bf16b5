//! Session configuration loaded from YAML or JSON.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use runboard_util::{DEFAULT_CACHE_VERSION, ViewStateCacheOptions};
use serde::{Deserialize, Serialize};

use crate::poller::PollPolicy;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Tunables for one executions session.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Cache namespace holding the persisted filter criteria.
    pub cache_namespace: String,
    /// Bump to invalidate every persisted filter.
    pub cache_version: u32,
    pub cache_max_age_days: u64,
    pub poll: PollSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_namespace: "executions".to_string(),
            cache_version: DEFAULT_CACHE_VERSION,
            cache_max_age_days: 180,
            poll: PollSettings::default(),
        }
    }
}

impl SessionConfig {
    pub fn cache_options(&self) -> ViewStateCacheOptions {
        ViewStateCacheOptions {
            version: self.cache_version,
            max_age: Duration::from_secs(self.cache_max_age_days.saturating_mul(SECONDS_PER_DAY)),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll.interval_ms),
            max_interval: Duration::from_millis(self.poll.max_interval_ms),
            max_attempts: self.poll.max_attempts,
            backoff_factor: self.poll.backoff_factor,
        }
    }
}

/// Appearance poll schedule as written in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
    pub backoff_factor: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            interval_ms: policy.interval.as_millis() as u64,
            max_interval_ms: policy.max_interval.as_millis() as u64,
            max_attempts: policy.max_attempts,
            backoff_factor: policy.backoff_factor,
        }
    }
}

/// Reads a [`SessionConfig`] from a YAML or JSON file.
///
/// JSON parses as YAML, so one parser covers both formats.
pub fn load_config_file(file_path: impl AsRef<Path>) -> Result<SessionConfig> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read session config: {}", file_path.display()))?;
    if content.trim().is_empty() {
        return Ok(SessionConfig::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Invalid session config: {}", file_path.display()))
}
