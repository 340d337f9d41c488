//! Token-bucket rate limiter with a runtime-swappable rate.
//!
//! The rate is stored as an atomically-swapped `f64`; waiters snapshot it on
//! every pass, so a rate update takes effect on the next token computation
//! rather than being held stale across a suspension point. Burst capacity is
//! one second's worth of tokens, never less than one.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Upper bound on one sleep between token checks, so rate updates are
/// picked up promptly even at very low rates.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate_bits: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            rate_bits: AtomicU64::new(rate_per_second.to_bits()),
            bucket: Mutex::new(Bucket {
                tokens: Self::burst_for(rate_per_second),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    /// Swap the rate. Accumulated tokens are clamped to the new burst so a
    /// rate reduction takes effect immediately.
    pub fn update_rate(&self, rate_per_second: f64) {
        self.rate_bits
            .store(rate_per_second.to_bits(), Ordering::Release);
        let mut bucket = self.bucket.lock().expect("limiter poisoned");
        bucket.tokens = bucket.tokens.min(Self::burst_for(rate_per_second));
    }

    /// Take one token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("limiter poisoned");
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take one token, sleeping until one accrues. Callers race this against
    /// their cancellation signal in a `select!`.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("limiter poisoned");
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let rate = self.rate().max(f64::MIN_POSITIVE);
                Duration::from_secs_f64((1.0 - bucket.tokens) / rate).min(MAX_WAIT_SLICE)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Return a token taken for a dispatch attempt that delivered nothing.
    pub fn give_back(&self) {
        let mut bucket = self.bucket.lock().expect("limiter poisoned");
        bucket.tokens = (bucket.tokens + 1.0).min(Self::burst_for(self.rate()));
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let rate = self.rate();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(Self::burst_for(rate));
        bucket.last_refill = now;
    }

    fn burst_for(rate: f64) -> f64 {
        rate.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_starts_full() {
        let limiter = RateLimiter::new(2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn give_back_restores_a_token() {
        let limiter = RateLimiter::new(1.0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        limiter.give_back();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn rate_reduction_clamps_accumulated_tokens() {
        let limiter = RateLimiter::new(100.0);
        limiter.update_rate(0.1);
        assert!(limiter.try_acquire());
        // Burst for 0.1/s is one token, already spent.
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.rate(), 0.1);
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(20.0);
        for _ in 0..20 {
            assert!(limiter.try_acquire());
        }
        let start = Instant::now();
        limiter.acquire().await;
        // One token accrues in ~50ms at 20/s.
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn acquire_blocks_until_cancelled_at_tiny_rate() {
        let limiter = RateLimiter::new(0.1);
        assert!(limiter.try_acquire());

        let acquired = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(acquired.is_err(), "no token should accrue in 50ms at 0.1/s");
    }
}
