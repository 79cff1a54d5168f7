//! Token-bucket limiter for outbound writes.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Allows `burst` writes back to back, refilling at `per_second`.
#[derive(Debug)]
pub struct WriteLimiter {
    per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl WriteLimiter {
    /// Full bucket. `per_second` must be positive and `burst` at least 1;
    /// other values are clamped.
    pub fn new(per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            per_second: if per_second.is_finite() && per_second > 0.0 {
                per_second
            } else {
                f64::MIN_POSITIVE
            },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available, otherwise report how long until one
    /// will be.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.per_second;
            Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait until a token is available and take it.
    ///
    /// Cancel-safe: dropping the future before it resolves takes nothing.
    pub async fn acquire(&self) {
        loop {
            match self.take() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis(), "write rate limited");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
