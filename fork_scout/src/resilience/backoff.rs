use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::api::RateLimitSignal;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Upper bound on waiting for a rate limit reset.
    pub max_rate_limit_wait: Duration,
    /// Multiplicative jitter, the delay is scaled by a factor drawn from `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            max_rate_limit_wait: Duration::from_secs(15 * 60),
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt + 1`.
    ///
    /// A rate limit reset in the future wins over guessing: we wait until the quota resets, bounded by
    /// `max_rate_limit_wait`. Otherwise exponential backoff with jitter.
    pub fn next_delay(&self, attempt: u32, signal: Option<&RateLimitSignal>) -> Duration {
        if let Some(wait) = signal.and_then(|signal| signal.reset_in(Utc::now())) {
            return wait.min(self.max_rate_limit_wait);
        }
        self.jittered(self.exponential_delay(attempt))
    }

    /// `min(base_delay * backoff_factor ^ attempt, max_delay)`
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !seconds.is_finite() || seconds >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let low = (1.0 - self.jitter).max(0.0);
        let factor = rand::thread_rng().gen_range(low..=1.0 + self.jitter);
        delay.mul_f64(factor)
    }
}
