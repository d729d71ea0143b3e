//! Fixed-delay retry policy.
//!
//! The `enforce` flag selects between two disciplines:
//!
//! * best effort (`enforce = false`): a failed attempt is final. Reads use this
//!   and recover by moving on to a different backend instead.
//! * mandatory (`enforce = true`): the same destination is retried up to
//!   `max_retries` times, waiting `retry_delay` before each retry.
//!
//! The delay never grows between retries.

use std::time::Duration;

/// Immutable retry settings, built from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt when enforcing.
    pub max_retries: u32,
    /// Wait before every retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the duration, then try the same destination again.
    RetryAfter(Duration),
    /// Stop and report the last failure.
    GiveUp,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Begin a fresh logical send. Counters never carry over between sends.
    pub fn start(&self, enforce: bool) -> RetryState {
        RetryState {
            policy: *self,
            enforce,
            retries: 0,
        }
    }

    /// Upper bound on attempts against one destination for one logical send.
    pub fn max_attempts(&self, enforce: bool) -> u32 {
        if enforce {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// Per-send retry counter.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    enforce: bool,
    retries: u32,
}

impl RetryState {
    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(&mut self) -> RetryDecision {
        if !self.enforce || self.retries >= self.policy.max_retries {
            return RetryDecision::GiveUp;
        }
        self.retries += 1;
        RetryDecision::RetryAfter(self.policy.retry_delay)
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// 1-based number of the attempt about to be made.
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    /// Whether this send retries the same destination.
    pub fn is_enforced(&self) -> bool {
        self.enforce
    }
}
