// src/utils/retry.rs

//! Shared retry-with-backoff for network calls.
//!
//! One policy type is used for the publisher, the credential exchange and the
//! snapshot sources, so every call site retries the same way.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * n` after the n-th failure
    #[default]
    Linear,
    /// `base * 2^(n-1)` after the n-th failure
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth function for the delay
    #[serde(default)]
    pub backoff: Backoff,

    /// Hard cap on a single delay in milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            backoff: Backoff::Linear,
            max_delay_ms: defaults::max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A linear policy with the given attempt count and base delay.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff: Backoff::Linear,
            max_delay_ms: defaults::max_delay_ms(),
        }
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-indexed).
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let factor: u64 = match self.backoff {
            Backoff::Linear => u64::from(n),
            Backoff::Exponential => 1u64.checked_shl(n - 1).unwrap_or(u64::MAX),
        };
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// The error of the last attempt together with how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Run `operation` until it succeeds, fails permanently, or the policy is exhausted.
///
/// The closure receives the 1-indexed attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() || attempt >= max_attempts => {
                if attempt > 1 {
                    log::warn!("{label}: giving up after {attempt} attempts: {error}");
                }
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for_attempt(attempt);
                log::warn!(
                    "{label}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

mod defaults {
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay_ms() -> u64 {
        2_000
    }
    pub fn max_delay_ms() -> u64 {
        60_000
    }
}
