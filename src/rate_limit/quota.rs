//! The three-window quota limiter.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quota_gate::rate_limit::{QuotaConfig, QuotaLimiter};
//!
//! # async fn run() -> Result<(), quota_gate::GateError> {
//! let limiter = Arc::new(QuotaLimiter::new(QuotaConfig::default()));
//!
//! // Suspends until all three quotas have room.
//! let waited = limiter.await_slot().await?;
//! println!("admitted after {:?}", waited);
//! println!("{:?}", limiter.stats());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::QuotaExceeded;
use crate::rate_limit::clock::{Clock, SystemClock, until_local_midnight};
use crate::rate_limit::limits;
use crate::rate_limit::window::SlidingWindowLog;
use crate::rate_limit::QuotaWindow;

/// What to do when a caller has waited the full ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Log at error level and send the request anyway.
    #[default]
    ForceProceed,
    /// Return [`QuotaExceeded`] to the caller.
    Fail,
}

/// Quota limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Maximum requests within any 1 second.
    pub per_second_cap: u32,
    /// Maximum requests within any 60 seconds.
    pub per_minute_cap: u32,
    /// Maximum requests per local calendar day.
    pub per_day_cap: u32,
    /// Ceiling on the total time one caller waits for a slot.
    pub max_wait: Duration,
    /// Behavior once `max_wait` is reached.
    pub overflow: OverflowPolicy,
}

impl QuotaConfig {
    /// Create a configuration with the given caps and default wait behavior.
    pub fn new(per_second_cap: u32, per_minute_cap: u32, per_day_cap: u32) -> Self {
        Self {
            per_second_cap,
            per_minute_cap,
            per_day_cap,
            ..Self::default()
        }
    }

    /// Set the wait ceiling.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            per_second_cap: limits::DEFAULT_PER_SECOND,
            per_minute_cap: limits::DEFAULT_PER_MINUTE,
            per_day_cap: limits::DEFAULT_PER_DAY,
            max_wait: limits::DEFAULT_MAX_WAIT,
            overflow: OverflowPolicy::ForceProceed,
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may be sent now.
    Allowed,
    /// A quota is full.
    Throttled {
        /// The first window found full.
        window: QuotaWindow,
        /// How long until that window frees a slot.
        wait: Duration,
    },
}

impl Admission {
    /// Check if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// Suggested wait before asking again. Zero when allowed.
    pub fn wait_hint(&self) -> Duration {
        match self {
            Admission::Allowed => Duration::ZERO,
            Admission::Throttled { wait, .. } => *wait,
        }
    }
}

/// Point-in-time usage snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStats {
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub cache_hits: u64,
    pub daily_request_count: u32,
    pub daily_limit: u32,
    pub daily_remaining: u32,
    pub recent_per_second: u32,
    pub recent_per_minute: u32,
    /// Throttled share of all requests, e.g. `"40.0%"`.
    pub throttle_rate: String,
}

impl QuotaStats {
    /// Flatten into a key/value map for logs and dashboards.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("total_requests", self.total_requests.to_string()),
            ("throttled_requests", self.throttled_requests.to_string()),
            ("cache_hits", self.cache_hits.to_string()),
            ("daily_request_count", self.daily_request_count.to_string()),
            ("daily_limit", self.daily_limit.to_string()),
            ("daily_remaining", self.daily_remaining.to_string()),
            ("recent_per_second", self.recent_per_second.to_string()),
            ("recent_per_minute", self.recent_per_minute.to_string()),
            ("throttle_rate", self.throttle_rate.clone()),
        ])
    }
}

#[derive(Debug)]
struct QuotaState {
    per_second: SlidingWindowLog,
    per_minute: SlidingWindowLog,
    daily_count: u32,
    day_anchor: NaiveDate,
    total_requests: u64,
    throttled_requests: u64,
    cache_hits: u64,
}

/// Enforces per-second, per-minute and per-day request quotas.
///
/// One limiter is meant to be shared (behind an [`Arc`]) by every call site
/// that talks to the same upstream account. All counters sit behind a single
/// mutex; checking and recording a request happen under one acquisition so
/// two callers can never both claim the last free slot. Sleeping always
/// happens with that mutex released.
///
/// Waiting callers are admitted in FIFO order through an admission gate
/// shared by async and blocking callers.
#[derive(Debug)]
pub struct QuotaLimiter {
    config: QuotaConfig,
    state: Mutex<QuotaState>,
    /// FIFO queue of callers waiting for a slot
    admission: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl QuotaLimiter {
    /// Create a limiter on the system clock.
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter on a custom clock.
    ///
    /// Caps of zero are raised to one.
    pub fn with_clock(mut config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        for (window, cap) in [
            (QuotaWindow::PerSecond, &mut config.per_second_cap),
            (QuotaWindow::PerMinute, &mut config.per_minute_cap),
            (QuotaWindow::Daily, &mut config.per_day_cap),
        ] {
            if *cap == 0 {
                warn!(%window, "Quota cap of zero raised to one");
                *cap = 1;
            }
        }

        let state = QuotaState {
            per_second: SlidingWindowLog::new(
                limits::PER_SECOND_HORIZON,
                limits::PER_SECOND_RETENTION,
                config.per_second_cap,
            ),
            per_minute: SlidingWindowLog::new(
                limits::PER_MINUTE_HORIZON,
                limits::PER_MINUTE_RETENTION,
                config.per_minute_cap,
            ),
            daily_count: 0,
            day_anchor: clock.local_now().date(),
            total_requests: 0,
            throttled_requests: 0,
            cache_hits: 0,
        };

        Self {
            config,
            state: Mutex::new(state),
            admission: tokio::sync::Mutex::new(()),
            clock,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Check whether a request could be sent now, without recording one.
    pub fn can_proceed(&self) -> Admission {
        let mut state = self.lock_state();
        self.evaluate(&mut state)
    }

    /// Record a request that is being sent.
    ///
    /// Prefer [`try_acquire`](Self::try_acquire) or the `await_slot` methods,
    /// which check and record atomically.
    pub fn record_request(&self) {
        let mut state = self.lock_state();
        self.record(&mut state);
    }

    /// Check and, if allowed, record a request under one lock acquisition.
    pub fn try_acquire(&self) -> Admission {
        let mut state = self.lock_state();
        let admission = self.evaluate(&mut state);
        if admission.is_allowed() {
            self.record(&mut state);
        }
        admission
    }

    /// Count a call answered from cache. Does not touch the quotas.
    pub fn record_cache_hit(&self) {
        self.lock_state().cache_hits += 1;
    }

    /// Wait for a slot from async code.
    ///
    /// Returns the time elapsed since the call started, including time spent
    /// queued behind other waiters. That total never runs past
    /// [`QuotaConfig::max_wait`] by more than one poll: once it is reached
    /// the request is either forced through or rejected, depending on
    /// [`QuotaConfig::overflow`].
    pub async fn await_slot(&self) -> Result<Duration, QuotaExceeded> {
        let start = tokio::time::Instant::now();
        let mut throttled = false;

        let queued = tokio::time::timeout(self.config.max_wait, self.admission.lock()).await;
        let Ok(_turn) = queued else {
            self.poll_slot(Duration::ZERO, &mut throttled)?;
            return Ok(start.elapsed());
        };

        loop {
            let remaining = self.config.max_wait.saturating_sub(start.elapsed());
            match self.poll_slot(remaining, &mut throttled)? {
                Some(pause) => tokio::time::sleep(pause).await,
                None => return Ok(start.elapsed()),
            }
        }
    }

    /// Wait for a slot from a plain thread.
    ///
    /// Same semantics as [`await_slot`](Self::await_slot).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn await_slot_blocking(&self) -> Result<Duration, QuotaExceeded> {
        let start = Instant::now();
        let mut throttled = false;

        let turn = match self.admission.try_lock() {
            Ok(turn) => Some(turn),
            Err(_) => {
                let budget = self.config.max_wait.saturating_sub(start.elapsed());
                self.queue_blocking(budget)
            }
        };
        let Some(_turn) = turn else {
            self.poll_slot(Duration::ZERO, &mut throttled)?;
            return Ok(start.elapsed());
        };

        loop {
            let remaining = self.config.max_wait.saturating_sub(start.elapsed());
            match self.poll_slot(remaining, &mut throttled)? {
                Some(pause) => std::thread::sleep(pause),
                None => return Ok(start.elapsed()),
            }
        }
    }

    /// Join the admission queue from a plain thread, giving up after
    /// `budget`.
    fn queue_blocking(&self, budget: Duration) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        if budget.is_zero() {
            return None;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Cannot build wait runtime, queueing without deadline");
                return Some(self.admission.blocking_lock());
            }
        };
        runtime
            .block_on(tokio::time::timeout(budget, self.admission.lock()))
            .ok()
    }

    /// Take a usage snapshot. Has no side effects.
    pub fn stats(&self) -> QuotaStats {
        let state = self.lock_state();
        let now = self.clock.now();

        // A rollover not yet applied still counts as a fresh day.
        let daily_request_count = if self.clock.local_now().date() > state.day_anchor {
            0
        } else {
            state.daily_count
        };

        let throttle_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.throttled_requests as f64 / state.total_requests as f64 * 100.0
        };

        QuotaStats {
            total_requests: state.total_requests,
            throttled_requests: state.throttled_requests,
            cache_hits: state.cache_hits,
            daily_request_count,
            daily_limit: self.config.per_day_cap,
            daily_remaining: self.config.per_day_cap.saturating_sub(daily_request_count),
            recent_per_second: state.per_second.occupancy(now),
            recent_per_minute: state.per_minute.occupancy(now),
            throttle_rate: format!("{:.1}%", throttle_rate),
        }
    }

    /// One step of the wait loop.
    ///
    /// Returns `Ok(None)` once the request is recorded, or the next pause.
    /// A zero `remaining` budget applies the overflow policy.
    fn poll_slot(
        &self,
        remaining: Duration,
        throttled: &mut bool,
    ) -> Result<Option<Duration>, QuotaExceeded> {
        let mut state = self.lock_state();

        let (window, wait) = match self.evaluate(&mut state) {
            Admission::Allowed => {
                self.record(&mut state);
                return Ok(None);
            }
            Admission::Throttled { window, wait } => (window, wait),
        };

        if !*throttled {
            *throttled = true;
            state.throttled_requests += 1;
            if window == QuotaWindow::Daily {
                error!(
                    daily_count = state.daily_count,
                    daily_limit = self.config.per_day_cap,
                    ?wait,
                    "Daily request quota exhausted"
                );
            } else {
                debug!(%window, ?wait, "Quota window full, waiting");
            }
        }

        if !remaining.is_zero() {
            return Ok(Some(wait.min(remaining)));
        }

        match self.config.overflow {
            OverflowPolicy::ForceProceed => {
                error!(
                    %window,
                    max_wait = ?self.config.max_wait,
                    "Quota wait ceiling reached, forcing request through"
                );
                self.record(&mut state);
                Ok(None)
            }
            OverflowPolicy::Fail => Err(QuotaExceeded {
                window,
                retry_after: wait,
            }),
        }
    }

    fn evaluate(&self, state: &mut QuotaState) -> Admission {
        self.roll_day(state);
        let now = self.clock.now();

        state.per_second.prune(now);
        if let Some(wait) = state.per_second.time_until_available(now) {
            return Admission::Throttled {
                window: QuotaWindow::PerSecond,
                wait: wait.max(limits::MIN_WAIT),
            };
        }

        state.per_minute.prune(now);
        if let Some(wait) = state.per_minute.time_until_available(now) {
            return Admission::Throttled {
                window: QuotaWindow::PerMinute,
                wait: wait.max(limits::MIN_WAIT),
            };
        }

        if state.daily_count >= self.config.per_day_cap {
            let wait = until_local_midnight(self.clock.local_now());
            return Admission::Throttled {
                window: QuotaWindow::Daily,
                wait: wait.max(limits::MIN_WAIT),
            };
        }

        Admission::Allowed
    }

    fn record(&self, state: &mut QuotaState) {
        self.roll_day(state);
        let now = self.clock.now();

        state.per_second.record(now);
        state.per_minute.record(now);
        state.daily_count = state.daily_count.saturating_add(1);
        state.total_requests += 1;
    }

    /// Reset the daily counter once the local date has moved forward.
    fn roll_day(&self, state: &mut QuotaState) {
        let today = self.clock.local_now().date();
        if today > state.day_anchor {
            debug!(previous = %state.day_anchor, %today, "Resetting daily request count");
            state.daily_count = 0;
            state.day_anchor = today;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for QuotaLimiter {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
