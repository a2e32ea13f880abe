//! Sliding window log counter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window parameters for a sliding window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// Length of the trailing window
    pub window: Duration,
    /// Maximum requests admitted within one window
    pub limit: u32,
}

impl WindowParams {
    /// Create a new set of window parameters.
    pub fn new(window: Duration, limit: u32) -> Self {
        Self { window, limit }
    }
}

#[derive(Debug)]
struct WindowState {
    params: WindowParams,
    /// Admitted request timestamps, oldest at the front
    log: VecDeque<Instant>,
}

impl WindowState {
    fn evict(&mut self, now: Instant) {
        // Before the process has been alive for a full window nothing can
        // have aged out yet.
        let Some(cutoff) = now.checked_sub(self.params.window) else {
            return;
        };

        while let Some(&oldest) = self.log.front() {
            if oldest < cutoff {
                self.log.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_insert(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.log.len() < self.params.limit as usize {
            self.log.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Counts admitted requests over a trailing time window.
///
/// Memory is proportional to the number of requests inside the window.
/// Evict, check and insert run as one critical section.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    state: Mutex<WindowState>,
}

impl SlidingWindowCounter {
    /// Create an empty counter.
    pub fn new(params: WindowParams) -> Self {
        Self {
            state: Mutex::new(WindowState {
                params,
                log: VecDeque::new(),
            }),
        }
    }

    /// Admit one request if the window has room.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Admit one request as of `now` if the window has room.
    ///
    /// Entries strictly older than `now - window` are evicted first; the new
    /// timestamp is recorded only when the request is admitted.
    pub fn admit_at(&self, now: Instant) -> bool {
        self.state.lock().try_insert(now)
    }

    /// Adopt `params`, then admit as of `now`.
    pub fn admit_with(&self, params: WindowParams, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.params = params;
        state.try_insert(now)
    }

    /// Number of requests currently inside the window.
    pub fn current_count_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        state.evict(now);
        state.log.len()
    }

    /// Remaining admissions in the current window.
    pub fn remaining_at(&self, now: Instant) -> u32 {
        let mut state = self.state.lock();
        state.evict(now);
        (state.params.limit as usize).saturating_sub(state.log.len()) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter(window_ms: u64, limit: u32) -> SlidingWindowCounter {
        SlidingWindowCounter::new(WindowParams::new(Duration::from_millis(window_ms), limit))
    }

    #[test]
    fn test_admits_up_to_limit() {
        let sw = counter(60_000, 5);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(sw.admit_at(now));
        }
        assert!(!sw.admit_at(now));
        assert_eq!(sw.current_count_at(now), 5);
        assert_eq!(sw.remaining_at(now), 0);
    }

    #[test]
    fn test_window_expiry() {
        // window=2s, limit=1
        let sw = counter(2000, 1);
        let start = Instant::now();

        assert!(sw.admit_at(start));
        assert!(!sw.admit_at(start));
        assert!(sw.admit_at(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_denied_requests_are_not_recorded() {
        let sw = counter(1000, 1);
        let start = Instant::now();

        assert!(sw.admit_at(start));
        for i in 1..10 {
            assert!(!sw.admit_at(start + Duration::from_millis(i * 50)));
        }
        // Only the first admission occupies the window
        assert!(sw.admit_at(start + Duration::from_millis(1001)));
    }

    #[test]
    fn test_entry_at_cutoff_is_retained() {
        let sw = counter(1000, 1);
        let start = Instant::now();

        assert!(sw.admit_at(start));
        // cutoff == start, and only entries strictly older are evicted
        assert!(!sw.admit_at(start + Duration::from_millis(1000)));
        assert!(sw.admit_at(start + Duration::from_millis(1001)));
    }

    #[test]
    fn test_eviction_is_partial() {
        let sw = counter(1000, 2);
        let start = Instant::now();

        assert!(sw.admit_at(start));
        assert!(sw.admit_at(start + Duration::from_millis(600)));
        assert!(!sw.admit_at(start + Duration::from_millis(900)));

        // First entry ages out, second is still inside the window
        let later = start + Duration::from_millis(1200);
        assert_eq!(sw.current_count_at(later), 1);
        assert!(sw.admit_at(later));
        assert!(!sw.admit_at(later));
    }

    #[test]
    fn test_zero_limit_admits_nothing() {
        let sw = counter(1000, 0);
        assert!(!sw.admit());
    }

    #[test]
    fn test_admit_with_adopts_new_limit() {
        let sw = counter(60_000, 10);
        let now = Instant::now();

        let tight = WindowParams::new(Duration::from_secs(60), 2);
        assert!(sw.admit_with(tight, now));
        assert!(sw.admit_with(tight, now));
        assert!(!sw.admit_with(tight, now));
    }

    #[test]
    fn test_concurrent_admits_respect_limit() {
        let sw = Arc::new(counter(60_000, 25));
        let admitted = Arc::new(AtomicU32::new(0));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let sw = sw.clone();
                let admitted = admitted.clone();
                s.spawn(move || {
                    for _ in 0..20 {
                        if sw.admit() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
    }
}
