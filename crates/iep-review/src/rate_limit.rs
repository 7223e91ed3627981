//! Outbound pacing for agent calls.
//!
//! A token bucket refilled at `rps` tokens per second, holding at most `rps`. A call that
//! finds the bucket empty reserves the next token and sleeps until it is due, as long as
//! that is within `max_wait`; otherwise it is refused with the time until a token frees up.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent rate limit of {rps} calls/s reached; next slot in ~{}ms", .retry_after.as_millis())]
pub struct Throttled {
    pub rps: u32,
    pub retry_after: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    rps: u32,
    max_wait: Duration,
    bucket: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    /// Negative while tokens are reserved by waiting callers.
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// `None` when `rps` is absent or zero.
    pub fn new(rps: Option<u32>, max_wait: Duration) -> Option<Self> {
        let rps = rps.filter(|&n| n > 0)?;
        Some(Self {
            rps,
            max_wait,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: f64::from(rps),
                refilled_at: Instant::now(),
            })),
        })
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Take a slot for one agent call. Returns how long the call was held back.
    pub async fn acquire(&self) -> Result<Duration, Throttled> {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            let rps = f64::from(self.rps);
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
            bucket.refilled_at = now;
            bucket.tokens = (bucket.tokens + elapsed * rps).min(rps);

            let wait = if bucket.tokens >= 1.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64((1.0 - bucket.tokens) / rps)
            };
            if wait > self.max_wait {
                return Err(Throttled {
                    rps: self.rps,
                    retry_after: wait,
                });
            }
            bucket.tokens -= 1.0;
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_missing_disables() {
        assert!(RateLimiter::new(None, Duration::ZERO).is_none());
        assert!(RateLimiter::new(Some(0), Duration::ZERO).is_none());
        assert_eq!(RateLimiter::new(Some(3), Duration::ZERO).map(|r| r.rps()), Some(3));
    }

    #[tokio::test]
    async fn burst_then_refuse_without_wait_budget() {
        let limiter = RateLimiter::new(Some(2), Duration::ZERO).unwrap();
        assert_eq!(limiter.acquire().await, Ok(Duration::ZERO));
        assert_eq!(limiter.acquire().await, Ok(Duration::ZERO));
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.rps, 2);
        assert!(err.retry_after > Duration::ZERO);
        assert!(err.retry_after <= Duration::from_millis(500));
        assert!(err.to_string().contains("2 calls/s"));
    }

    #[tokio::test]
    async fn short_deficit_is_waited_out() {
        let limiter = RateLimiter::new(Some(50), Duration::from_secs(1)).unwrap();
        for _ in 0..50 {
            assert_eq!(limiter.acquire().await, Ok(Duration::ZERO));
        }
        let started = Instant::now();
        let waited = limiter.acquire().await.unwrap();
        assert!(waited > Duration::ZERO);
        assert!(started.elapsed() >= waited);
    }

    #[tokio::test]
    async fn reservations_queue_behind_each_other() {
        let limiter = RateLimiter::new(Some(1), Duration::from_millis(1_500)).unwrap();
        assert_eq!(limiter.acquire().await, Ok(Duration::ZERO));
        // First waiter reserves the next token; the one after would need ~2s.
        let first = limiter.clone();
        let waiter = tokio::spawn(async move { first.acquire().await });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = limiter.acquire().await.unwrap_err();
        assert!(err.retry_after > Duration::from_millis(1_500));
        assert!(waiter.await.unwrap().is_ok());
    }
}
