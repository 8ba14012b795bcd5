//! Bounded retries with exponential backoff.
//!
//! A [`RetryPolicy`] wraps one fallible async operation (opening a socket)
//! and reports its progress through a callback:
//!
//! ```text
//! Connecting → attempt 1 → Retry{1} → sleep → attempt 2 → Retry{2} → ...
//! ```
//!
//! After `retries + 1` failed attempts the last error is wrapped in
//! [`Error::RetriesExhausted`].

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default number of extra attempts.
pub const DEFAULT_RETRIES: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// RetryEvent
// ============================================================================

/// Progress reported while retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// Before the first attempt.
    Connecting,
    /// Before retry number `attempt` (1-based), after waiting `delay`.
    Retry {
        /// Retry number.
        attempt: u32,
        /// Backoff applied before this retry.
        delay: Duration,
    },
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Retry count and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Delay before the first retry; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Returns a policy that tries once.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `attempt` until it succeeds or the policy is exhausted.
    ///
    /// `target` names what is being retried in the final error.
    ///
    /// # Errors
    ///
    /// - The attempt's own error if it is not retryable
    /// - [`Error::RetriesExhausted`] wrapping the last error otherwise
    pub async fn run<T, F, Fut, P>(&self, target: &str, mut attempt: F, mut on_event: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnMut(RetryEvent),
    {
        on_event(RetryEvent::Connecting);

        let mut last_error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        for retry in 1..=self.retries {
            let delay = self.delay_before(retry);
            warn!(
                target_url = %target,
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Attempt failed, retrying"
            );
            on_event(RetryEvent::Retry {
                attempt: retry,
                delay,
            });
            tokio::time::sleep(delay).await;

            match attempt().await {
                Ok(value) => {
                    debug!(target_url = %target, attempt = retry, "Retry succeeded");
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last_error = e,
            }
        }

        Err(Error::retries_exhausted(
            target,
            self.attempts(),
            last_error,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
