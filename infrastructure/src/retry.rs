//! Retry bookkeeping for one logical request.
//!
//! [`RetryState`] only decides; it never sleeps. The caller drives it and
//! waits through a [`Sleeper`], so the same logic works on a blocking thread
//! or under the tokio scheduler.

use async_trait::async_trait;
use domain::error::RemoteFailure;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub total_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
            total_deadline: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the backoff window after the `retry`-th failure
    /// (0-based): `min(max_delay, base_delay * 2^retry)`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Full-jitter delay: `unit` is a uniform sample from `[0, 1)`.
    pub fn delay(&self, retry: u32, unit: f64) -> Duration {
        let unit = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.0 };
        let ceiling = self.ceiling(retry);
        ceiling.mul_f64(unit).min(ceiling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    Permanent,
    AttemptsExhausted,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp(GiveUpReason),
}

#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Timeout for the next attempt, shortened to the time `remaining` before
    /// the total deadline.
    pub fn attempt_timeout(&self, remaining: Duration) -> Duration {
        self.policy.attempt_timeout.min(remaining)
    }

    pub fn on_failure(
        &mut self,
        failure: &RemoteFailure,
        elapsed: Duration,
        jitter: f64,
    ) -> RetryDecision {
        if !failure.is_transient() {
            return RetryDecision::GiveUp(GiveUpReason::Permanent);
        }
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
        }
        let delay = self.policy.delay(self.attempts.saturating_sub(1), jitter);
        if elapsed + delay >= self.policy.total_deadline {
            return RetryDecision::GiveUp(GiveUpReason::DeadlineExceeded);
        }
        RetryDecision::Retry { delay }
    }
}

/// Suspension point between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
