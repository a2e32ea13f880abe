//! In-process rate limiter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::sliding_window::{SlidingWindowCounter, WindowParams};
use super::store::RateLimiterStore;
use super::token_bucket::{BucketParams, TokenBucket};

/// Rate limiter state held in process memory.
///
/// One `TokenBucket` and one `SlidingWindowCounter` are created lazily per
/// key. The maps are sharded, so callers on different keys do not contend;
/// callers on the same key serialize on that key's own lock. Entries live
/// for the lifetime of the store.
#[derive(Default)]
pub struct MemoryStore {
    /// Token buckets indexed by actor key
    buckets: DashMap<String, Arc<TokenBucket>>,
    /// Sliding window counters indexed by actor key
    windows: DashMap<String, Arc<SlidingWindowCounter>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, key: &str, params: BucketParams) -> Arc<TokenBucket> {
        if let Some(existing) = self.buckets.get(key) {
            return Arc::clone(&existing);
        }
        // `entry` holds the shard lock, so only one bucket is ever created
        // for a key.
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, capacity = params.capacity, "Creating token bucket");
            Arc::new(TokenBucket::new(params))
        });
        Arc::clone(&entry)
    }

    fn window(&self, key: &str, params: WindowParams) -> Arc<SlidingWindowCounter> {
        if let Some(existing) = self.windows.get(key) {
            return Arc::clone(&existing);
        }
        let entry = self.windows.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, limit = params.limit, "Creating sliding window counter");
            Arc::new(SlidingWindowCounter::new(params))
        });
        Arc::clone(&entry)
    }

    /// Admit against the sliding window for `key` as of `now`.
    pub fn admit_window_at(&self, key: &str, params: WindowParams, now: Instant) -> bool {
        // The map guard is released before the per-key lock is taken.
        let counter = self.window(key, params);
        counter.admit_with(params, now)
    }

    /// Admit against the token bucket for `key` as of `now`.
    pub fn admit_bucket_at(&self, key: &str, params: BucketParams, now: Instant) -> bool {
        let bucket = self.bucket(key, params);
        bucket.admit_with(params, now)
    }

    /// Number of keys with a token bucket.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of keys with a sliding window counter.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.buckets.clear();
        self.windows.clear();
    }
}

#[async_trait]
impl RateLimiterStore for MemoryStore {
    async fn admit_window(&self, key: &str, window: Duration, limit: u32) -> bool {
        let admitted = self.admit_window_at(key, WindowParams::new(window, limit), Instant::now());
        trace!(key = %key, admitted, "Sliding window check");
        admitted
    }

    async fn admit_bucket(
        &self,
        key: &str,
        capacity: u32,
        tokens_per_interval: u32,
        refill_interval: Duration,
    ) -> bool {
        let params = BucketParams::new(capacity, tokens_per_interval, refill_interval);
        let admitted = self.admit_bucket_at(key, params, Instant::now());
        trace!(key = %key, admitted, "Token bucket check");
        admitted
    }
}
