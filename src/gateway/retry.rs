use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Exponential backoff with symmetric jitter for transient remote failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay for a retry attempt: `min(max, base * 2^attempt)`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Backoff with symmetric jitter of up to `delay * jitter_factor`.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt).as_secs_f64();
        let jitter = delay * self.jitter_factor * jitter_fraction();
        Duration::from_secs_f64((delay + jitter).max(0.0))
    }
}

/// 429 and 5xx statuses are retryable; everything else surfaces immediately.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Uniform-ish value in [-1, 1] derived from the subsecond clock, so
/// concurrent clients don't retry in lockstep.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    2.0 * (0.5 - (nanos as f64 / 1_000_000_000.0))
}
