use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-refill limiter: holds up to `burst` tokens and refills at
/// `per_second` tokens per second. Each `acquire` spends one token.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    /// `per_second` and `burst` are raised to at least 1.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        RateLimiter {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            per_second: f64::from(per_second.max(1)),
            burst,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second)
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(10, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_the_configured_rate() {
        let limiter = RateLimiter::new(10, 1);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // One token up front, then three refills at 100ms each.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(290), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
    }
}
