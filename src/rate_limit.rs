//! Rate Limiting
//!
//! Token bucket rate limiter, one bucket per live connection. Buckets are
//! keyed by connection handle rather than identity: a client must be rate
//! limited before it has proven who it is.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::connection_registry::ConnectionId;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-connection token bucket rate limiter.
pub struct RateLimiter {
    buckets: RwLock<HashMap<ConnectionId, TokenBucket>>,
    /// Bucket capacity; also the per-minute budget.
    max_per_minute: u32,
}

impl RateLimiter {
    /// `max_per_minute` is the message budget per connection per minute;
    /// unused budget accumulates up to one minute's worth of burst.
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: RwLock::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Tries to consume one token for this connection.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn consume(&self, id: ConnectionId) -> bool {
        let capacity = f64::from(self.max_per_minute);
        let refill_per_sec = capacity / 60.0;

        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets.entry(id).or_insert_with(|| TokenBucket {
            tokens: capacity,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops buckets idle longer than `max_idle`. Returns the number
    /// removed. Run periodically so closed connections do not accumulate.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap();
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_refill) < max_idle);
        before - buckets.len()
    }

    /// Number of tracked buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap().len()
    }
}
