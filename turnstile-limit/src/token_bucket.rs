use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::Instant;

use super::Admission;
use super::Reason;

/// Continuous-refill token bucket for a single key.
///
/// The bucket does no locking of its own. A [`RateLimiterRegistry`](crate::RateLimiterRegistry)
/// owns every bucket and serializes access to it.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// `rate` and `capacity` are trusted here; they are validated when the
    /// owning [`LimiterConfig`](crate::LimiterConfig) is built.
    pub fn new(rate: f64, capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
            rate,
            capacity: f64::from(capacity),
        }
    }

    /// Refills for the time elapsed since the last call, then tries to take one token.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            ControlFlow::Continue(())
        } else {
            // Time until the fractional remainder grows back to a whole token.
            // A very slow rate can push this past what a Duration holds.
            let wait = (1.0 - self.tokens) / self.rate;
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX),
            })
        }
    }

    /// Tokens currently available, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        // A clock that appears to run backwards adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}
