use std::time::Duration;

use crate::error::UnitOfWorkError;

/// Bounds for the optimistic commit retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Total commit attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the backoff.
    pub max_backoff: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// What the session should do after a failed commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `backoff`, prepare the handle, and attempt commit again.
    Retry { backoff: Duration },
    /// Stop retrying and surface the attempt's error.
    Stop,
}

/// Pure retry algorithm: given an attempt outcome, decide retry or stop and
/// how long to back off. Performs no I/O and no sleeping itself.
///
/// Only aborts are retryable; the backoff strictly increases attempt over
/// attempt until it reaches the cap.
#[derive(Debug)]
pub struct RetryController {
    settings: RetrySettings,
    failed_attempts: u32,
    next_backoff: Duration,
}

impl RetryController {
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            next_backoff: settings.initial_backoff,
            settings,
            failed_attempts: 0,
        }
    }

    /// Number of failed commit attempts observed so far.
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Record a failed attempt and decide whether to retry.
    pub fn decide(&mut self, err: &UnitOfWorkError) -> RetryDecision {
        self.failed_attempts += 1;

        if !err.is_abort() {
            return RetryDecision::Stop;
        }
        if self.failed_attempts >= self.settings.max_attempts {
            return RetryDecision::Stop;
        }

        let backoff = self.next_backoff;
        self.next_backoff = self.advance(backoff);
        RetryDecision::Retry { backoff }
    }

    fn advance(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.settings.multiplier.max(1.0));
        grown.min(self.settings.max_backoff)
    }
}
