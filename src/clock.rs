use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

// Source of "now" in Unix seconds for the rate limiter
pub trait Clock: Send + Sync {
    fn unix_now(&self) -> i64;
}

// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle
/// and hand another to the limiter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
