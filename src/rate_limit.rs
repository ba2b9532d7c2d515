use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::metrics::TRACKED_IDENTITIES;

// Outcome of one rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: usize },
    Limited { count: usize },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Append `now` to a window and drop every timestamp at or before
/// `now - window_secs`. Returns the number of survivors.
pub fn touch_window(window: &mut Vec<i64>, now: i64, window_secs: i64) -> usize {
    window.push(now);
    let threshold = now - window_secs;
    window.retain(|&t| t > threshold);
    window.len()
}

/// Per-identity sliding window limiter.
///
/// Every identity maps to the timestamps (Unix seconds) of its recent
/// requests. A single mutex guards the whole map, and the clock is read
/// only after the lock is taken so each identity's timestamps stay
/// ascending.
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, Vec<i64>>>,
    limit: usize,
    window_secs: i64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit: limit as usize,
            // a zero window would prune the request that was just recorded
            window_secs: window.as_secs().max(1) as i64,
            clock,
        }
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<i64>>> {
        // map stays consistent even if a holder panicked mid-touch
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Record a request at an explicit time and return the survivor count
    pub fn touch(&self, identity: &str, now: i64) -> usize {
        let mut windows = self.lock();
        let window = windows.entry(identity.to_string()).or_default();
        touch_window(window, now, self.window_secs)
    }

    /// Record a request for `identity` at the current time and decide.
    ///
    /// Occupancy equal to the limit is still allowed; only a count strictly
    /// greater than the limit is rejected.
    pub fn check(&self, identity: &str) -> RateDecision {
        let (count, tracked) = {
            let mut windows = self.lock();
            let now = self.clock.unix_now();
            let window = windows.entry(identity.to_string()).or_default();
            let count = touch_window(window, now, self.window_secs);
            (count, windows.len())
        };
        TRACKED_IDENTITIES.set(tracked as f64);

        if count > self.limit {
            debug!(identity, count, limit = self.limit, "rate limit exceeded");
            RateDecision::Limited { count }
        } else {
            RateDecision::Allowed { count }
        }
    }

    /// Forget identities whose newest request is older than `idle_for`.
    ///
    /// Live windows are never pruned here; that only happens on touch.
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let mut windows = self.lock();
        let cutoff = self.clock.unix_now() - idle_for.as_secs() as i64;
        let before = windows.len();
        windows.retain(|_, stamps| stamps.last().is_some_and(|&newest| newest > cutoff));
        let evicted = before - windows.len();
        TRACKED_IDENTITIES.set(windows.len() as f64);
        evicted
    }

    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }
}

// Background sweep for dormant identities, runs for the life of the process
pub async fn idle_sweeper(limiter: Arc<SlidingWindowLimiter>, every: Duration, idle_for: Duration) {
    // tokio rejects a zero period
    let every = every.max(Duration::from_secs(1));
    let mut interval = interval(every);

    info!(?every, ?idle_for, "idle identity sweeper started");

    loop {
        interval.tick().await;

        let evicted = limiter.evict_idle(idle_for);
        if evicted > 0 {
            debug!(evicted, remaining = limiter.tracked_identities(), "evicted idle identities");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window: u64, clock: &ManualClock) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(limit, Duration::from_secs(window), Arc::new(clock.clone()))
    }

    #[test]
    fn touch_counts_entries_inside_window() {
        let mut window = Vec::new();
        let stamps = [1, 4, 9, 30, 61, 62, 90];
        let mut last = 0;
        for t in stamps {
            last = touch_window(&mut window, t, 60);
        }
        let expected = stamps.iter().filter(|&&t| t > 90 - 60).count();
        assert_eq!(last, expected);
        assert_eq!(window, vec![61, 62, 90]);
    }

    #[test]
    fn touch_at_same_instant_counts_both() {
        let mut window = vec![0, 50];
        assert_eq!(touch_window(&mut window, 100, 60), 1);
        assert_eq!(touch_window(&mut window, 100, 60), 2);
        assert_eq!(window, vec![100, 100]);
    }

    #[test]
    fn threshold_entry_is_stale() {
        let mut window = vec![40];
        // 40 is not > 100 - 60
        assert_eq!(touch_window(&mut window, 100, 60), 1);
    }

    #[test]
    fn limit_is_exceeded_only_above_the_limit() {
        let clock = ManualClock::new(0);
        let limiter = limiter(2, 60, &clock);

        assert_eq!(limiter.check("x"), RateDecision::Allowed { count: 1 });
        assert_eq!(limiter.check("x"), RateDecision::Allowed { count: 2 });
        assert_eq!(limiter.check("x"), RateDecision::Limited { count: 3 });
    }

    #[test]
    fn rejected_requests_still_occupy_the_window() {
        let clock = ManualClock::new(0);
        let limiter = limiter(2, 60, &clock);

        for t in [0, 10, 20] {
            clock.set(t);
            limiter.check("x");
        }

        clock.set(65);
        assert_eq!(limiter.check("x"), RateDecision::Limited { count: 3 });

        clock.set(71);
        assert_eq!(limiter.check("x"), RateDecision::Limited { count: 3 });

        clock.set(140);
        assert_eq!(limiter.check("x"), RateDecision::Allowed { count: 1 });
    }

    #[test]
    fn identities_are_counted_separately() {
        let clock = ManualClock::new(1_000);
        let limiter = limiter(1, 60, &clock);

        assert!(limiter.check("alice").is_allowed());
        assert!(limiter.check("bob").is_allowed());
        assert!(!limiter.check("alice").is_allowed());
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[test]
    fn evict_idle_drops_only_dormant_identities() {
        let clock = ManualClock::new(0);
        let limiter = limiter(5, 60, &clock);

        limiter.check("old");
        clock.set(100);
        limiter.check("fresh");

        clock.set(130);
        assert_eq!(limiter.evict_idle(Duration::from_secs(120)), 1);
        assert_eq!(limiter.tracked_identities(), 1);

        // the surviving window was not pruned by the sweep
        assert_eq!(limiter.touch("fresh", 130), 2);
    }

    #[tokio::test]
    async fn sweeper_survives_a_zero_period() {
        let clock = ManualClock::new(0);
        let limiter = Arc::new(limiter(1, 0, &clock));

        let sweeper = tokio::spawn(idle_sweeper(Arc::clone(&limiter), Duration::ZERO, Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!sweeper.is_finished());
        sweeper.abort();
    }

    #[test]
    fn zero_window_is_clamped() {
        let clock = ManualClock::new(0);
        let limiter = limiter(1, 0, &clock);
        assert_eq!(limiter.window_secs(), 1);
        assert!(limiter.check("x").is_allowed());
    }
}
