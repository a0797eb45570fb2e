//! Retry policy applied by the fetch coordinator.
//!
//! Only transient failures are retried. `Status`, `Decode` and `Cancelled`
//! describe outcomes that another attempt would reproduce or that the caller
//! asked for, so they end the fetch even if listed in `retryable`.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{FetchError, FetchErrorKind};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(n-1)` before retry `n`, never more than `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Treated as 1 when 0.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: BTreeSet<FetchErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(100),
                max: Duration::from_secs(5),
            },
            retryable: Self::transient_kinds(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            retryable: Self::transient_kinds(),
        }
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = FetchErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    fn transient_kinds() -> BTreeSet<FetchErrorKind> {
        [FetchErrorKind::Transport, FetchErrorKind::Timeout]
            .into_iter()
            .collect()
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, err: &FetchError) -> bool {
        match err.kind() {
            FetchErrorKind::Status | FetchErrorKind::Decode | FetchErrorKind::Cancelled => false,
            kind => self.retryable.contains(&kind),
        }
    }

    /// Whether another attempt follows a failed attempt number `attempt`.
    pub fn should_retry(&self, err: &FetchError, attempt: u32) -> bool {
        attempt < self.attempts() && self.is_retryable(err)
    }
}
