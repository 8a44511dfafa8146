/// Reconnect pacing between failed session attempts
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BackoffPolicy;

// 2^16 * base is far past any sensible cap
const MAX_EXPONENT: u32 = 16;
// Longest wait between attempts, whatever the policy says
const MAX_DELAY: Duration = Duration::from_secs(86_400);

#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    next_attempt_at: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Backoff {
            policy,
            failures: 0,
            next_attempt_at: None,
        }
    }

    /// Whether the delay after the last failure has elapsed
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt_at.map_or(true, |at| now >= at)
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = self.current_delay().min(MAX_DELAY);
        self.failures = self.failures.saturating_add(1);
        self.next_attempt_at = Some(now.checked_add(delay).unwrap_or(now));
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt_at = None;
    }

    fn current_delay(&self) -> Duration {
        match self.policy {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 1u32 << self.failures.min(MAX_EXPONENT);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}
