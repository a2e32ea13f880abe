//! Storage abstraction binding the rate limiting algorithms to a keyspace.

use async_trait::async_trait;
use std::time::Duration;

/// Trait for rate limiter storage backends.
///
/// This trait abstracts over the in-process `MemoryStore` and the
/// `SharedStore` so enforcement works identically against either. Both
/// operations are safe to call concurrently from many tasks and never return
/// an error: a backend that cannot reach its state admits the request.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    /// Admit one request for `key` if fewer than `limit` requests were
    /// admitted within the trailing `window`.
    async fn admit_window(&self, key: &str, window: Duration, limit: u32) -> bool;

    /// Take one token from the bucket for `key`, refilling
    /// `tokens_per_interval` tokens every `refill_interval` up to `capacity`.
    async fn admit_bucket(
        &self,
        key: &str,
        capacity: u32,
        tokens_per_interval: u32,
        refill_interval: Duration,
    ) -> bool;
}
