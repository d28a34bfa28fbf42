//! Quota enforcement for an upstream API.
//!
//! The upstream enforces three simultaneous quotas: requests per second,
//! requests per minute and requests per day. This module keeps every caller
//! inside all three, suspending callers that would exceed them.
//!
//! ## Quota Windows
//!
//! - **Per second**: sliding-window log, enforced over the last 1.0s
//! - **Per minute**: sliding-window log, enforced over the last 60s
//! - **Per day**: plain counter, reset when the local calendar date advances
//!
//! ## Example
//!
//! ```rust
//! use quota_gate::rate_limit::{QuotaConfig, QuotaLimiter};
//!
//! let limiter = QuotaLimiter::new(QuotaConfig::new(2, 100, 1_000));
//!
//! assert!(limiter.try_acquire().is_allowed());
//! assert!(limiter.try_acquire().is_allowed());
//! // The per-second window is now full.
//! assert!(!limiter.can_proceed().is_allowed());
//! ```
//!
//! Waiting callers use [`QuotaLimiter::await_slot`] from async code or
//! [`QuotaLimiter::await_slot_blocking`] from plain threads. Both share the
//! same state and the same FIFO admission queue.

mod clock;
mod quota;
mod ttl_cache;
mod window;

pub use clock::{Clock, ManualClock, SystemClock, until_local_midnight};
pub use quota::{Admission, OverflowPolicy, QuotaConfig, QuotaLimiter, QuotaStats};
pub use ttl_cache::TtlCache;
pub use window::SlidingWindowLog;

/// One of the three quotas the limiter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaWindow {
    /// Requests per second.
    PerSecond,
    /// Requests per minute.
    PerMinute,
    /// Requests per local calendar day.
    Daily,
}

impl std::fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QuotaWindow::PerSecond => "per-second",
            QuotaWindow::PerMinute => "per-minute",
            QuotaWindow::Daily => "daily",
        };
        f.write_str(name)
    }
}

/// Quota constants.
pub mod limits {
    use std::time::Duration;

    /// Hard ceilings documented by the upstream provider.
    pub mod provider {
        /// Maximum requests per second.
        pub const REQUESTS_PER_SECOND: u32 = 10;
        /// Maximum requests per minute.
        pub const REQUESTS_PER_MINUTE: u32 = 200;
        /// Maximum requests per day.
        pub const REQUESTS_PER_DAY: u32 = 100_000;
        /// Maximum symbols per quote request.
        pub const SYMBOLS_PER_REQUEST: usize = 50;
    }

    /// Default per-second cap (80% of the provider ceiling).
    pub const DEFAULT_PER_SECOND: u32 = 8;
    /// Default per-minute cap (90% of the provider ceiling).
    pub const DEFAULT_PER_MINUTE: u32 = 180;
    /// Default daily cap (90% of the provider ceiling).
    pub const DEFAULT_PER_DAY: u32 = 90_000;

    /// Age below which an entry counts against the per-second cap.
    pub const PER_SECOND_HORIZON: Duration = Duration::from_secs(1);
    /// Age after which an entry is dropped from the per-second log.
    pub const PER_SECOND_RETENTION: Duration = Duration::from_millis(1_500);
    /// Age below which an entry counts against the per-minute cap.
    pub const PER_MINUTE_HORIZON: Duration = Duration::from_secs(60);
    /// Age after which an entry is dropped from the per-minute log.
    pub const PER_MINUTE_RETENTION: Duration = Duration::from_secs(65);

    /// Smallest wait hint handed out, so pollers never spin.
    pub const MIN_WAIT: Duration = Duration::from_millis(10);
    /// Default ceiling on the total time a caller waits for a slot.
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);
}
