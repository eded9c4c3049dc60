use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::warn;

/// Process-wide registry of token-bucket limiters, keyed by provider class.
///
/// Every job fetching through the same provider shares one bucket, so
/// parallel jobs cannot collectively exhaust a provider's quota. The first
/// caller to name a key fixes its parameters; later callers presenting
/// different parameters keep the original bucket and get a warning.
pub struct SharedRateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl SharedRateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Block until a token for `key` is available.
    pub async fn acquire(&self, key: &str, calls: u32, period: Duration) {
        let bucket = {
            let entry = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(TokenBucket::new(calls, period)));
            let bucket = entry.value().clone();
            if bucket.calls != calls.max(1) || bucket.period != period {
                warn!(
                    "Rate limiter '{}' already registered with {}/{:?}; ignoring {}/{:?}",
                    key, bucket.calls, bucket.period, calls, period
                );
            }
            bucket
        };

        bucket.acquire().await;
    }

    /// Remaining whole tokens for a key, for monitoring.
    #[allow(dead_code)]
    pub fn available_tokens(&self, key: &str) -> Option<u32> {
        self.buckets.get(key).map(|b| b.available())
    }
}

impl Default for SharedRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Classic token bucket: starts full, refills continuously at
/// `calls / period`, never holds more than `calls` tokens.
struct TokenBucket {
    calls: u32,
    period: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(calls: u32, period: Duration) -> Self {
        let calls = calls.max(1);
        Self {
            calls,
            period,
            state: Mutex::new(BucketState {
                tokens: calls as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.calls as f64 / self.period.as_secs_f64().max(f64::EPSILON)
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens =
                    (state.tokens + elapsed * self.refill_rate()).min(self.calls as f64);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_rate(),
                    ))
                }
            };

            match wait {
                None => return,
                // Sleep outside the lock so other keys are not held up
                Some(delay) => sleep(delay).await,
            }
        }
    }

    fn available(&self) -> u32 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate()).min(self.calls as f64);
        state.last_refill = now;
        state.tokens as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = SharedRateLimiter::new();
        let start = std::time::Instant::now();

        limiter.acquire("test", 3, Duration::from_secs(60)).await;
        limiter.acquire("test", 3, Duration::from_secs(60)).await;
        limiter.acquire("test", 3, Duration::from_secs(60)).await;

        assert!(
            start.elapsed().as_millis() < 100,
            "burst within capacity should not wait"
        );
    }

    #[tokio::test]
    async fn test_exhausted_bucket_waits_for_refill() {
        let limiter = SharedRateLimiter::new();
        // 2 calls per 200ms: one token refills every 100ms
        let period = Duration::from_millis(200);
        limiter.acquire("refill", 2, period).await;
        limiter.acquire("refill", 2, period).await;

        let start = std::time::Instant::now();
        limiter.acquire("refill", 2, period).await;
        assert!(
            start.elapsed().as_millis() >= 80,
            "third call should wait for a token"
        );
    }

    #[tokio::test]
    async fn test_same_key_shares_one_bucket() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let period = Duration::from_millis(200);

        // Exhaust the bucket from one task
        limiter.acquire("shared", 1, period).await;

        // A different caller on the same key must see the empty bucket
        let start = std::time::Instant::now();
        limiter.acquire("shared", 1, period).await;
        assert!(start.elapsed().as_millis() >= 150);
    }

    #[tokio::test]
    async fn test_mismatched_parameters_keep_first_registration() {
        let limiter = SharedRateLimiter::new();
        limiter.acquire("fixed", 5, Duration::from_secs(60)).await;
        // Different parameters are ignored; the call still succeeds
        limiter.acquire("fixed", 100, Duration::from_secs(1)).await;
        assert_eq!(limiter.available_tokens("fixed"), Some(3));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_interfere() {
        let limiter = SharedRateLimiter::new();
        let period = Duration::from_millis(500);
        limiter.acquire("a", 1, period).await;

        // Key "b" has its own bucket and proceeds immediately
        let start = std::time::Instant::now();
        limiter.acquire("b", 1, period).await;
        assert!(start.elapsed().as_millis() < 100);
    }
}
