//! Token bucket burst controller.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Refill parameters for a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    /// Maximum number of tokens held
    pub capacity: u32,
    /// Tokens added per elapsed refill interval
    pub tokens_per_interval: u32,
    /// Length of one refill interval
    pub refill_interval: Duration,
}

impl BucketParams {
    /// Create a new set of bucket parameters.
    pub fn new(capacity: u32, tokens_per_interval: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            tokens_per_interval,
            refill_interval,
        }
    }

    /// Whether this bucket ever refills.
    ///
    /// A zero rate or a zero interval leaves a bucket that only drains.
    pub fn refills(&self) -> bool {
        self.tokens_per_interval > 0 && !self.refill_interval.is_zero()
    }
}

#[derive(Debug)]
struct BucketState {
    params: BucketParams,
    tokens: u32,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        if !self.params.refills() {
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let interval = self.params.refill_interval;
        let intervals = elapsed.as_nanos() / interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let added = intervals.saturating_mul(self.params.tokens_per_interval as u128);
        let tokens = (self.tokens as u128).saturating_add(added);
        self.tokens = tokens.min(self.params.capacity as u128) as u32;

        // Advance by whole intervals so partial progress toward the next
        // refill is kept.
        let advanced = interval
            .checked_mul(u32::try_from(intervals).unwrap_or(u32::MAX))
            .unwrap_or(elapsed);
        self.last_refill += advanced.min(elapsed);
    }

    fn take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// A token bucket with lazy, elapsed-time refill.
///
/// All reads and writes of the token count happen under one lock, so two
/// concurrent callers can never both spend the last token. Admission never
/// blocks beyond that short critical section.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(params: BucketParams) -> Self {
        Self::new_at(params, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(params: BucketParams, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                params,
                tokens: params.capacity,
                last_refill: now,
            }),
        }
    }

    /// Try to take one token.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Try to take one token as of `now`.
    pub fn admit_at(&self, now: Instant) -> bool {
        self.state.lock().take(now)
    }

    /// Adopt `params`, then try to take one token as of `now`.
    ///
    /// Tokens already held are clamped to the new capacity.
    pub fn admit_with(&self, params: BucketParams, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.params != params {
            state.refill(now);
            state.params = params;
            state.tokens = state.tokens.min(params.capacity);
        }
        state.take(now)
    }

    /// Tokens currently available, after applying any due refill.
    pub fn available(&self) -> u32 {
        self.available_at(Instant::now())
    }

    /// Tokens available as of `now`.
    pub fn available_at(&self, now: Instant) -> u32 {
        let mut state = self.state.lock();
        state.refill(now);
        state.tokens
    }

    /// The parameters currently in force.
    pub fn params(&self) -> BucketParams {
        self.state.lock().params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn bucket(capacity: u32, per_interval: u32, interval_ms: u64, now: Instant) -> TokenBucket {
        TokenBucket::new_at(
            BucketParams::new(capacity, per_interval, Duration::from_millis(interval_ms)),
            now,
        )
    }

    #[test]
    fn test_drains_to_empty() {
        let start = Instant::now();
        let tb = bucket(3, 2, 1000, start);

        for _ in 0..3 {
            assert!(tb.admit_at(start));
        }
        assert!(!tb.admit_at(start));
        assert_eq!(tb.available_at(start), 0);
    }

    #[test]
    fn test_refill_after_one_interval() {
        // capacity=3, 2 tokens per 1s
        let start = Instant::now();
        let tb = bucket(3, 2, 1000, start);

        for _ in 0..3 {
            assert!(tb.admit_at(start));
        }
        assert!(!tb.admit_at(start));

        let later = start + Duration::from_secs(1);
        assert!(tb.admit_at(later));
        assert!(tb.admit_at(later));
        assert!(!tb.admit_at(later));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let start = Instant::now();
        let tb = bucket(5, 2, 100, start);

        for _ in 0..5 {
            assert!(tb.admit_at(start));
        }

        // 10 intervals would add 20 tokens, capacity caps it at 5
        let later = start + Duration::from_millis(1000);
        assert_eq!(tb.available_at(later), 5);
    }

    #[test]
    fn test_partial_interval_does_not_refill() {
        let start = Instant::now();
        let tb = bucket(1, 1, 1000, start);

        assert!(tb.admit_at(start));
        assert!(!tb.admit_at(start + Duration::from_millis(999)));
        assert!(tb.admit_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_partial_progress_is_kept() {
        let start = Instant::now();
        let tb = bucket(1, 1, 1000, start);

        assert!(tb.admit_at(start));
        // 1.5 intervals: one token, half an interval carried over
        assert!(tb.admit_at(start + Duration::from_millis(1500)));
        assert!(tb.admit_at(start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_zero_rate_only_drains() {
        let start = Instant::now();
        let tb = bucket(2, 0, 1000, start);

        assert!(tb.admit_at(start));
        assert!(tb.admit_at(start));
        assert!(!tb.admit_at(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_zero_interval_only_drains() {
        let start = Instant::now();
        let tb = bucket(1, 5, 0, start);

        assert!(tb.admit_at(start));
        assert!(!tb.admit_at(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_out_of_order_instant_does_not_refill() {
        let start = Instant::now();
        let tb = bucket(1, 1, 10, start + Duration::from_secs(1));

        assert!(tb.admit_at(start + Duration::from_secs(1)));
        assert!(!tb.admit_at(start));
    }

    #[test]
    fn test_admit_with_clamps_to_new_capacity() {
        let start = Instant::now();
        let tb = bucket(10, 0, 1000, start);

        let shrunk = BucketParams::new(2, 0, Duration::from_secs(1));
        assert!(tb.admit_with(shrunk, start));
        assert!(tb.admit_with(shrunk, start));
        assert!(!tb.admit_with(shrunk, start));
        assert_eq!(tb.params().capacity, 2);
    }

    #[test]
    fn test_concurrent_admits_never_overspend() {
        let tb = Arc::new(TokenBucket::new(BucketParams::new(
            100,
            0,
            Duration::from_secs(1),
        )));
        let admitted = Arc::new(AtomicU32::new(0));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let tb = tb.clone();
                let admitted = admitted.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        if tb.admit() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 100);
        assert_eq!(tb.available(), 0);
    }
}
