//! Rate limiter store backed by a shared remote key-value store.
//!
//! Every admission is a single server-side atomic step, so correctness
//! across processes comes from the store rather than from client locks.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::{trace, warn};

use super::store::RateLimiterStore;
use crate::error::{Result, RiskgateError};

/// Default deadline for one remote round trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Arguments of one atomic sliding window step.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCall {
    /// Store key holding the timestamp set
    pub key: String,
    /// Request time, unix nanoseconds
    pub now_nanos: i64,
    /// Entries scored at or below this are evicted
    pub cutoff_nanos: i64,
    /// Maximum entries retained in the window
    pub limit: u32,
    /// Key expiry in whole seconds
    pub window_secs: u64,
    /// Random member that keeps same-instant requests distinct
    pub tie_breaker: String,
}

/// Arguments of one atomic token bucket step.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCall {
    /// Store key holding `tokens` and `last_refill`
    pub key: String,
    /// Maximum tokens held
    pub capacity: u32,
    /// Tokens refilled per second
    pub refill_rate_per_sec: f64,
    /// Tokens consumed by this request
    pub requested: u32,
    /// Request time, unix seconds
    pub now_secs: i64,
}

/// Server-executed atomic read-modify-write steps.
///
/// Implementations must run each call as one indivisible unit from the
/// store's point of view.
#[async_trait]
pub trait AtomicScripts: Send + Sync {
    /// Evict, count and conditionally insert. Returns whether the request
    /// was admitted.
    async fn sliding_window(&self, call: &WindowCall) -> Result<bool>;

    /// Refill, check and conditionally consume. Returns whether the request
    /// was admitted.
    async fn token_bucket(&self, call: &BucketCall) -> Result<bool>;
}

/// A `RateLimiterStore` whose state lives in a shared remote store.
///
/// Fails open: when the remote store errors or exceeds the operation
/// timeout the request is admitted and a warning is logged.
pub struct SharedStore<S: AtomicScripts> {
    scripts: S,
    key_prefix: String,
    operation_timeout: Duration,
}

impl<S: AtomicScripts> SharedStore<S> {
    /// Create a shared store over `scripts`.
    pub fn new(scripts: S) -> Self {
        Self {
            scripts,
            key_prefix: String::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Prefix every store key, e.g. to share one server between services.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound each remote round trip.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// The underlying script runner.
    pub fn scripts(&self) -> &S {
        &self.scripts
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}sliding:{}", self.key_prefix, key)
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}bucket:{}", self.key_prefix, key)
    }

    /// Build the sliding window step for a request at `now_nanos`.
    pub fn window_call(&self, key: &str, window: Duration, limit: u32, now_nanos: i64) -> WindowCall {
        let window_nanos = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX);
        WindowCall {
            key: self.window_key(key),
            now_nanos,
            cutoff_nanos: now_nanos.saturating_sub(window_nanos),
            limit,
            window_secs: expiry_secs(window),
            tie_breaker: tie_breaker(),
        }
    }

    /// Build the token bucket step for a request at `now_secs`.
    pub fn bucket_call(
        &self,
        key: &str,
        capacity: u32,
        tokens_per_interval: u32,
        refill_interval: Duration,
        now_secs: i64,
    ) -> BucketCall {
        let refill_rate_per_sec = if tokens_per_interval > 0 && !refill_interval.is_zero() {
            tokens_per_interval as f64 / refill_interval.as_secs_f64()
        } else {
            0.0
        };
        BucketCall {
            key: self.bucket_key(key),
            capacity,
            refill_rate_per_sec,
            requested: 1,
            now_secs,
        }
    }

    async fn run<F>(&self, op: &'static str, key: &str, step: F) -> bool
    where
        F: std::future::Future<Output = Result<bool>> + Send,
    {
        let outcome = match tokio::time::timeout(self.operation_timeout, step).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RiskgateError::Timeout(self.operation_timeout)),
        };

        match outcome {
            Ok(admitted) => {
                trace!(op, key = %key, admitted, "Shared store check");
                admitted
            }
            Err(e) => {
                warn!(op, key = %key, error = %e, "Shared store unavailable, failing open");
                true
            }
        }
    }
}

#[async_trait]
impl<S: AtomicScripts> RateLimiterStore for SharedStore<S> {
    async fn admit_window(&self, key: &str, window: Duration, limit: u32) -> bool {
        let call = self.window_call(key, window, limit, unix_nanos());
        self.run("sliding_window", key, self.scripts.sliding_window(&call)).await
    }

    async fn admit_bucket(
        &self,
        key: &str,
        capacity: u32,
        tokens_per_interval: u32,
        refill_interval: Duration,
    ) -> bool {
        let call = self.bucket_call(
            key,
            capacity,
            tokens_per_interval,
            refill_interval,
            Utc::now().timestamp(),
        );
        self.run("token_bucket", key, self.scripts.token_bucket(&call)).await
    }
}

fn unix_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp().saturating_mul(1_000_000_000))
}

/// Whole seconds covering `window`, never less than one.
fn expiry_secs(window: Duration) -> u64 {
    let secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
    secs.max(1)
}

fn tie_breaker() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}
