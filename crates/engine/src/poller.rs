//! Bounded polling for a triggered execution to appear.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::trigger::ExecutionAppearancePoller;

/// Lists the execution ids currently known for an application.
#[async_trait]
pub trait ExecutionSource: Send + Sync {
    async fn execution_ids(&self, application: &str) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
impl<S: ExecutionSource + ?Sized> ExecutionSource for Arc<S> {
    async fn execution_ids(&self, application: &str) -> anyhow::Result<Vec<String>> {
        (**self).execution_ids(application).await
    }
}

/// Retry schedule for [`RetryingAppearancePoller`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub backoff_factor: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_attempts: 30,
            backoff_factor: 1.5,
        }
    }
}

impl PollPolicy {
    /// Delay after the attempt numbered `attempt` (zero based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(64) as i32);
        let scaled = self.interval.as_secs_f64() * factor;
        let capped = scaled.min(self.max_interval.as_secs_f64().max(self.interval.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("execution '{execution_id}' did not appear after {attempts} attempts")]
    Exhausted { execution_id: String, attempts: u32 },
}

/// Re-lists executions until the expected id shows up or the attempts run out.
pub struct RetryingAppearancePoller<S: ExecutionSource> {
    source: S,
    policy: PollPolicy,
}

impl<S: ExecutionSource> RetryingAppearancePoller<S> {
    pub fn new(source: S, policy: PollPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Returns the number of attempts it took. A failing listing still counts as an attempt.
    pub async fn wait_for(&self, application: &str, execution_id: &str) -> Result<u32, PollError> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.source.execution_ids(application).await {
                Ok(ids) if ids.iter().any(|id| id == execution_id) => {
                    debug!(application, execution_id, attempt = attempt + 1, "execution appeared");
                    return Ok(attempt + 1);
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(application, execution_id, attempt = attempt + 1, error = %error, "listing executions failed");
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }
        Err(PollError::Exhausted {
            execution_id: execution_id.to_string(),
            attempts,
        })
    }
}

#[async_trait]
impl<S: ExecutionSource> ExecutionAppearancePoller for RetryingAppearancePoller<S> {
    async fn wait_until_new_triggered_pipeline_appears(
        &self,
        application: &str,
        _pipeline_name: &str,
        execution_id: &str,
    ) -> anyhow::Result<()> {
        self.wait_for(application, execution_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports the id from the `appears_on` call onwards; fails on `fails_on`.
    struct CountingSource {
        calls: AtomicU32,
        appears_on: u32,
        fails_on: Option<u32>,
    }

    impl CountingSource {
        fn new(appears_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                appears_on,
                fails_on: None,
            }
        }
    }

    #[async_trait]
    impl ExecutionSource for CountingSource {
        async fn execution_ids(&self, _application: &str) -> anyhow::Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fails_on == Some(call) {
                return Err(anyhow!("gateway timeout"));
            }
            let mut ids = vec!["older".to_string()];
            if call >= self.appears_on {
                ids.push("fresh".to_string());
            }
            Ok(ids)
        }
    }

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            max_attempts,
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn resolves_once_execution_is_listed() {
        let poller = RetryingAppearancePoller::new(CountingSource::new(3), fast_policy(10));
        assert_eq!(poller.wait_for("deck", "fresh").await, Ok(3));
    }

    #[tokio::test]
    async fn listing_errors_count_as_attempts() {
        let source = CountingSource {
            fails_on: Some(1),
            ..CountingSource::new(2)
        };
        let poller = RetryingAppearancePoller::new(source, fast_policy(5));
        assert_eq!(poller.wait_for("deck", "fresh").await, Ok(2));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let poller = RetryingAppearancePoller::new(CountingSource::new(u32::MAX), fast_policy(3));
        let error = poller.wait_for("deck", "fresh").await.unwrap_err();
        assert_eq!(
            error,
            PollError::Exhausted {
                execution_id: "fresh".into(),
                attempts: 3
            }
        );
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 3);

        let via_trait = poller
            .wait_until_new_triggered_pipeline_appears("deck", "Deploy", "fresh")
            .await;
        assert!(via_trait.is_err());
    }

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let policy = PollPolicy {
            interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(300),
            max_attempts: 10,
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(300));
        assert_eq!(policy.delay_after(9), Duration::from_millis(300));
    }
}
