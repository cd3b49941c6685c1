use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sliding admission window. A record stamped `t` is live for `[t, t + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    length_ms: u64,
}

impl Window {
    pub fn new(length: Duration) -> Self {
        Self { length_ms: length.as_millis().min(u64::MAX as u128) as u64 }
    }

    pub fn length(&self) -> Duration {
        Duration::from_millis(self.length_ms)
    }

    /// Timestamps from the future (clock stepped back) count as live.
    #[inline]
    pub fn is_live(&self, timestamp: u64, now: u64) -> bool {
        now.saturating_sub(timestamp) < self.length_ms
    }
}

/// Source of "now" in unix millis.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for replay tools and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self { now: AtomicU64::new(start_millis) }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_half_open() {
        let w = Window::new(Duration::from_secs(10));
        assert!(w.is_live(1_000, 1_000));
        assert!(w.is_live(1_000, 10_999));
        assert!(!w.is_live(1_000, 11_000));
    }

    #[test]
    fn future_timestamps_stay_live() {
        let w = Window::new(Duration::from_secs(1));
        assert!(w.is_live(5_000, 1_000));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now_millis(), 150);
        clock.set(7);
        assert_eq!(clock.now_millis(), 7);
    }
}
