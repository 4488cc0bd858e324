//! Retry with exponential backoff.
//!
//! [`with_retry`] is the single retry wrapper used for every API call. Only
//! [`FetchError::Transient`] is retried; the delay before attempt `n` (1-based,
//! counting retries) is `base_delay * 2^(n-1)` capped at `max_delay`, or the
//! server's `Retry-After` if that is longer (still capped).

use super::FetchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// No waiting between attempts (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Backoff before retry number `retry` (1 = first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for(&self, retry: u32, err: &FetchError) -> Duration {
        let backoff = self.backoff(retry);
        match err {
            FetchError::Transient {
                retry_after: Some(after),
                ..
            } => backoff.max(*after).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or attempts run out.
///
/// `op` receives the 1-based attempt number. On exhaustion the last transient
/// error is returned unchanged, so callers can still tell it was transient.
pub fn with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Result<T, FetchError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt, &err);
                debug!(attempt, max_attempts, ?delay, error = %err, "retrying transient failure");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(attempts = attempt, error = %err, "giving up after retries");
                }
                return Err(err);
            }
        }
    }
}
