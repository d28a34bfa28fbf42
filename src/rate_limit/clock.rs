//! Time sources for the quota limiter.
//!
//! The sliding windows run on monotonic [`Instant`]s while the daily quota
//! follows the local wall clock, so a clock supplies both.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Source of monotonic instants and local wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current local date and time.
    fn local_now(&self) -> NaiveDateTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
///
/// Both the monotonic and the wall-clock reading advance together.
///
/// ```rust
/// use std::time::Duration;
/// use chrono::NaiveDate;
/// use quota_gate::rate_limit::{Clock, ManualClock};
///
/// let start = NaiveDate::from_ymd_opt(2024, 3, 1)
///     .and_then(|d| d.and_hms_opt(23, 59, 0))
///     .unwrap();
/// let clock = ManualClock::new(start);
///
/// clock.advance(Duration::from_secs(120));
/// assert_eq!(clock.local_now().to_string(), "2024-03-02 00:01:00");
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    local_origin: NaiveDateTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock whose local time starts at `local_origin`.
    pub fn new(local_origin: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            local_origin,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn local_now(&self) -> NaiveDateTime {
        TimeDelta::from_std(self.offset())
            .ok()
            .and_then(|delta| self.local_origin.checked_add_signed(delta))
            .unwrap_or(self.local_origin)
    }
}

/// Time remaining until the next local midnight.
pub fn until_local_midnight(now: NaiveDateTime) -> Duration {
    now.date()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .and_then(|midnight| (midnight - now).to_std().ok())
        .unwrap_or_default()
}
