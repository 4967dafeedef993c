//! Client-side request rate limiting
//!
//! The HTTP adapters share one limiter per remote API so concurrent bulk
//! fetches stay under the API's request rate. Callers await
//! [`RateLimiter::acquire`] before each request.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Request budget that refills continuously up to a burst size
#[derive(Debug)]
pub struct TokenBucket {
    burst: f64,
    available: f64,
    per_second: f64,
    updated: Instant,
}

impl TokenBucket {
    /// Bucket allowing `per_second` requests with bursts of `burst`
    pub fn new(per_second: u32, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            burst,
            available: burst,
            per_second: per_second.max(1) as f64,
            updated: Instant::now(),
        }
    }

    fn refill_at(&mut self, now: Instant) {
        let gained = now.saturating_duration_since(self.updated).as_secs_f64() * self.per_second;
        self.available = (self.available + gained).min(self.burst);
        self.updated = now;
    }

    /// Take one request slot at `now`, or report how long until one frees up
    pub fn take_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill_at(now);
        if self.available >= 1.0 {
            self.available -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.available) / self.per_second))
        }
    }
}

/// Async limiter shared by the tasks of one adapter
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Limiter whose burst equals one second of requests
    pub fn new(per_second: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(per_second, per_second)),
        }
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        loop {
            let outcome = self.bucket.lock().take_at(Instant::now());
            match outcome {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!("Rate limited, waiting {:?}", wait);
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}
