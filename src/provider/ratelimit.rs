//! Per-provider token-bucket rate limiter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilling at `max_requests_per_minute` tokens/min, capacity
/// equal to that same rate (bursts up to one minute's worth of requests).
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(max_requests_per_minute: u32) -> Self {
        let capacity = max_requests_per_minute.max(1) as f64;
        Self {
            capacity,
            refill_per_second: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }

    /// Block (async-cooperatively) until a slot is available or `timeout`
    /// elapses. Returns `false` on timeout, which callers treat as a
    /// transient provider error.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().expect("rate limiter poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bucket_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            assert!(bucket.acquire(Duration::from_millis(10)).await);
        }
    }

    #[tokio::test]
    async fn test_bucket_blocks_when_exhausted() {
        let bucket = TokenBucket::new(1);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
        let acquired = bucket.acquire(Duration::from_millis(50)).await;
        assert!(!acquired);
    }
}
