//! Bounded exponential backoff

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn sleeper(&self) -> RetrySleeper {
        RetrySleeper::new(*self)
    }
}

/// Doubles its delay on every sleep, capped at the policy maximum
#[derive(Debug)]
pub struct RetrySleeper {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetrySleeper {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay the next call to `sleep` will wait
    pub fn next_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.policy.initial.saturating_mul(factor).min(self.policy.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub async fn sleep(&mut self) {
        let delay = self.next_delay();
        self.attempt = self.attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}
