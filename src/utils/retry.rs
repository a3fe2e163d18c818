//! Bounded retry loops
//!
//! Unlike a `Result`-based retry, these helpers retry on an *outcome*: the
//! caller supplies a predicate that decides whether a value is worth another
//! attempt. The final value is returned as-is together with the number of
//! attempts made, leaving the caller to decide what exhaustion means.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget with a fixed pause between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one (at least 1)
    pub max_attempts: u32,

    /// Pause before each attempt after the first
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

impl RetryConfig {
    /// Fixed delay between a bounded number of attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Final value of a retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// Value of the last attempt
    pub value: T,

    /// Attempts made
    pub attempts: u32,

    /// Whether the loop stopped because the budget ran out
    pub exhausted: bool,
}

/// Run `operation` until `should_retry` rejects its value or the budget runs out
///
/// # Example
///
/// ```no_run
/// use cycler::utils::retry::{retry_while, RetryConfig};
/// use std::time::Duration;
///
/// # async fn example() {
/// let config = RetryConfig::fixed(3, Duration::from_secs(5));
/// let result = retry_while(&config, |_attempt| async { 429u16 }, |status| *status == 429).await;
/// assert!(result.exhausted);
/// # }
/// ```
pub async fn retry_while<T, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let value = operation(attempt).await;

        if !should_retry(&value) {
            return Retried {
                value,
                attempts: attempt,
                exhausted: false,
            };
        }

        if attempt >= max_attempts {
            return Retried {
                value,
                attempts: attempt,
                exhausted: true,
            };
        }

        attempt += 1;
        let delay = config.delay_before(attempt);
        debug!(
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Retrying operation after delay"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
