//! Linear retry.
//!
//! Tasks are retried blindly: only pass idempotent work.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use wavespace_core::RemoteSection;

/// Attempts and spacing for [`retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RemoteSection> for RetryPolicy {
    fn from(section: &RemoteSection) -> Self {
        Self::new(section.retry_attempts, section.retry_delay())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Attempts actually made: zero counts as one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep after failed attempt `attempt` (1-based), or `None` after the
    /// last one.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts()).then(|| self.base_delay.saturating_mul(attempt))
    }

    /// Run `task` under this policy.
    pub async fn run<T, E, F, Fut>(&self, task: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        retry(task, self.max_attempts, self.base_delay).await
    }
}

/// Run `task` up to `max_attempts` times, sleeping `base_delay * i` after
/// failed attempt `i`. Returns the last error once attempts run out.
pub async fn retry<T, E, F, Fut>(mut task: F, max_attempts: u32, base_delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let policy = RetryPolicy::new(max_attempts, base_delay);
    let mut attempt = 1;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.delay_for(attempt) {
                Some(delay) => {
                    tracing::warn!(attempt, max_attempts = policy.attempts(), error = %err, "Retrying task");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
        }
    }
}
