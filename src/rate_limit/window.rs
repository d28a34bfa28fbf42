//! Sliding-window request log.
//!
//! Entries are kept for a retention period that is slightly longer than the
//! enforcement horizon, so occupancy can still be reported for requests that
//! have just aged out of the quota window.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use quota_gate::rate_limit::SlidingWindowLog;
//!
//! let mut log = SlidingWindowLog::new(
//!     Duration::from_secs(1),      // Enforcement horizon
//!     Duration::from_millis(1500), // Retention
//!     2,                           // Cap
//! );
//!
//! let now = Instant::now();
//! log.record(now);
//! log.record(now);
//! assert!(log.is_full(now));
//! assert!(!log.is_full(now + Duration::from_secs(1)));
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ordered log of request instants for one quota window.
#[derive(Debug, Clone)]
pub struct SlidingWindowLog {
    /// Request instants, oldest first
    entries: VecDeque<Instant>,
    /// Entries younger than this count against the cap
    horizon: Duration,
    /// Entries older than this are pruned
    retention: Duration,
    /// Maximum in-window requests
    cap: u32,
    /// Maximum retained entries
    max_len: usize,
}

impl SlidingWindowLog {
    /// Create a new log.
    ///
    /// # Arguments
    ///
    /// * `horizon` - The enforcement window
    /// * `retention` - How long entries are kept at all (at least `horizon`)
    /// * `cap` - Maximum number of requests allowed within `horizon`
    pub fn new(horizon: Duration, retention: Duration, cap: u32) -> Self {
        // Keeping the newest 2 * cap entries is enough to detect a full
        // window even after forced bypasses overfill it.
        let max_len = (cap.max(1) as usize).saturating_mul(2);
        Self {
            entries: VecDeque::with_capacity(max_len),
            horizon,
            retention: retention.max(horizon),
            cap,
            max_len,
        }
    }

    /// The configured cap.
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Append a request made at `now`.
    pub fn record(&mut self, now: Instant) {
        if self.entries.len() == self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(now);
    }

    /// Drop entries older than the retention period.
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) > self.retention {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of entries younger than the enforcement horizon.
    pub fn occupancy(&self, now: Instant) -> u32 {
        self.entries
            .iter()
            .filter(|ts| self.in_window(**ts, now))
            .count() as u32
    }

    /// Whether another request at `now` would exceed the cap.
    pub fn is_full(&self, now: Instant) -> bool {
        self.occupancy(now) >= self.cap
    }

    /// Time until the oldest in-window entry ages out.
    ///
    /// Returns `None` if the window has room now.
    pub fn time_until_available(&self, now: Instant) -> Option<Duration> {
        if !self.is_full(now) {
            return None;
        }

        // A zero cap is full with nothing in the window.
        let wait = self
            .entries
            .iter()
            .find(|ts| self.in_window(**ts, now))
            .map_or(self.horizon, |oldest| {
                self.horizon
                    .saturating_sub(now.saturating_duration_since(*oldest))
            });
        Some(wait)
    }

    /// Number of retained entries, including ones past the horizon.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn in_window(&self, ts: Instant, now: Instant) -> bool {
        now.saturating_duration_since(ts) < self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(cap: u32) -> SlidingWindowLog {
        SlidingWindowLog::new(Duration::from_secs(1), Duration::from_millis(1500), cap)
    }

    #[test]
    fn test_window_fills_at_cap() {
        let mut log = log(3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(!log.is_full(now));
            log.record(now);
        }
        assert!(log.is_full(now));
        assert_eq!(log.occupancy(now), 3);
    }

    #[test]
    fn test_wait_hint_tracks_oldest_entry() {
        let mut log = log(2);
        let start = Instant::now();

        log.record(start);
        log.record(start + Duration::from_millis(300));

        let now = start + Duration::from_millis(400);
        assert_eq!(
            log.time_until_available(now),
            Some(Duration::from_millis(600))
        );

        // Oldest entry has aged out of the horizon.
        let later = start + Duration::from_secs(1);
        assert_eq!(log.time_until_available(later), None);
        assert_eq!(log.occupancy(later), 1);
    }

    #[test]
    fn test_prune_keeps_entries_within_retention() {
        let mut log = log(2);
        let start = Instant::now();
        log.record(start);

        log.prune(start + Duration::from_millis(1200));
        assert_eq!(log.len(), 1);
        assert_eq!(log.occupancy(start + Duration::from_millis(1200)), 0);

        log.prune(start + Duration::from_millis(1600));
        assert!(log.is_empty());
    }

    #[test]
    fn test_zero_cap_never_has_room() {
        let log = log(0);
        let now = Instant::now();

        assert!(log.is_full(now));
        assert_eq!(log.time_until_available(now), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_retained_length_is_bounded() {
        let mut log = log(2);
        let now = Instant::now();

        for _ in 0..10 {
            log.record(now);
        }
        assert_eq!(log.len(), 4);
        assert!(log.is_full(now));
    }
}
