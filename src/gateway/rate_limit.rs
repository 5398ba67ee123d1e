use std::time::{Duration, Instant};

/// Small pause added on top of the computed wait so the oldest timestamp is
/// safely outside the window when the next attempt fires.
const WAIT_BUFFER: Duration = Duration::from_millis(100);

/// Sliding-window limiter over call timestamps. Caps outbound call rate
/// independent of retry backoff; mutated on every attempted call.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_calls: usize,
    calls: Vec<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls,
            calls: Vec::new(),
        }
    }

    /// Drops timestamps that left the window, then reports how long the
    /// caller must sleep before the next attempt (None when under the cap).
    pub fn required_wait(&mut self, now: Instant) -> Option<Duration> {
        let window = self.window;
        self.calls.retain(|ts| now.duration_since(*ts) < window);

        if self.calls.len() < self.max_calls {
            return None;
        }
        let oldest = *self.calls.iter().min()?;
        let elapsed = now.duration_since(oldest);
        Some(window.saturating_sub(elapsed) + WAIT_BUFFER)
    }

    pub fn record(&mut self, now: Instant) {
        self.calls.push(now);
    }

    pub async fn acquire(&mut self) {
        if let Some(wait) = self.required_wait(Instant::now()) {
            tracing::warn!(wait_ms = wait.as_millis() as u64, "rate limit reached, pausing");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_the_cap_never_waits() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60), 20);
        let now = Instant::now();
        for _ in 0..19 {
            limiter.record(now);
        }
        assert_eq!(limiter.required_wait(now), None);
    }

    #[test]
    fn twenty_first_call_waits_out_the_window() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60), 20);
        let now = Instant::now();
        for _ in 0..20 {
            limiter.record(now);
        }
        let wait = limiter.required_wait(now).expect("must wait at the cap");
        // No time has elapsed since the oldest call, so the full window
        // remains.
        assert!(wait >= Duration::from_secs(60));
        assert!(wait <= Duration::from_secs(61));
    }

    #[test]
    fn expired_timestamps_free_capacity() {
        let mut limiter = RateLimiter::new(Duration::from_millis(10), 2);
        let past = Instant::now();
        limiter.record(past);
        limiter.record(past);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(limiter.required_wait(Instant::now()), None);
    }
}
