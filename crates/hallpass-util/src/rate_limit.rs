//! Per-client request rate limiting

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Token-bucket rate limiter with continuous refill.
///
/// Each client gets a bucket of `capacity` tokens that refills at
/// `capacity` tokens per `window`. Kiosk clients hammering the socket get
/// throttled without affecting other connections.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: HashMap<ClientId, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

impl RateLimiter {
    /// `capacity` requests allowed per `window`, bursts up to `capacity`.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            capacity: capacity as f64,
            refill_per_sec: capacity as f64 / secs,
            buckets: HashMap::new(),
        }
    }

    /// Record one request from `client_id`. Returns `false` when the
    /// client's bucket is empty and the request should be rejected.
    pub fn allow(&mut self, client_id: &ClientId) -> bool {
        let now = Instant::now();
        let bucket = self.buckets.entry(client_id.clone()).or_insert(Bucket {
            tokens: self.capacity,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop a disconnected client's bucket.
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.buckets.remove(client_id);
    }

    /// Drop buckets that have been idle longer than `stale_after`.
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < stale_after);
    }
}
