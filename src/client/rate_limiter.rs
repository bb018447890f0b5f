use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Token-bucket rate limiter shared by every caller of one provider.
///
/// Process-wide: all in-flight requests compete for the same budget, so the
/// sustained outbound rate respects the provider limit regardless of how
/// many pipelines are running.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `rate_per_sec` sustained requests per
    /// second, with a burst capacity of one second's budget.
    #[must_use]
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        let capacity = rate.max(1.0);
        debug!(rate, "created rate limiter");
        Self {
            rate_per_sec: rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a request is permitted, then consume one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter: waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Check whether a request would be admitted right now, without waiting
    /// or consuming a token.
    pub async fn check(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens >= 1.0
    }

    /// Configured sustained rate.
    #[must_use]
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_sec
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
