//! Retry policy and the executor that interprets it.
//!
//! The same executor wraps an adapter's production call path and, when a
//! playbook step asks for it, the orchestrator's re-issue of a whole step.
//! Only failures the caller classifies as retryable are attempted again.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rate_limit::Clock;

/// Retry policy for outbound calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try); values below 1 act as 1
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Double the delay after every failed attempt instead of keeping it constant
    #[serde(default = "default_exponential")]
    pub exponential: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_exponential() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            exponential: default_exponential(),
        }
    }
}

impl RetryPolicy {
    /// Try exactly once
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            exponential: false,
        }
    }

    /// Effective attempt bound (never below 1)
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return Duration::from_millis(self.backoff_ms);
        }

        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    /// Check if we may try again after `attempt` attempts
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }
}

/// A value together with the number of attempts it took
#[derive(Debug, Clone)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// The operation receives the 1-indexed attempt number. A failure is
/// retried only while attempts remain and `is_retryable` approves it;
/// anything else is returned as-is together with the attempt count.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    is_retryable: P,
    mut operation: F,
) -> Retried<Result<T, E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = operation(attempt).await;

        let retry = matches!(&result, Err(e) if policy.should_retry(attempt) && is_retryable(e));
        if !retry {
            return Retried {
                value: result,
                attempts: attempt,
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        if let Err(e) = &result {
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = ?e,
                "Retryable failure, backing off"
            );
        }
        clock.sleep(delay).await;
    }
}
