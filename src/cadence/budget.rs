//! Cycle budgeting and the clock fed to the decision engine.
//!
//! The cadence loop sleeps for whatever is left of the cycle period after
//! processing. An overrun cycle gets no sleep and no catch-up burst.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Fixed per-cycle time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBudget {
    period: Duration,
}

impl CycleBudget {
    /// Budget for a target rate. A zero rate is treated as one cycle per second.
    pub fn from_fps(fps: u32) -> Self {
        let period = Duration::from_secs(1)
            .checked_div(fps.max(1))
            .unwrap_or(Duration::from_secs(1));
        Self { period }
    }

    /// Budget with an explicit period.
    pub fn from_period(period: Duration) -> Self {
        Self { period }
    }

    /// Target cycle period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep owed after a cycle that took `elapsed`; `None` when over budget.
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.period
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }
}

impl Default for CycleBudget {
    fn default() -> Self {
        Self::from_fps(10)
    }
}

/// Time source for decision timestamps and timeouts.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored once, then advanced by tokio's monotonic clock.
///
/// Timeouts measured with it are immune to wall-clock jumps, and under a
/// paused tokio runtime it advances with the virtual clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    /// Clock anchored at the current wall time.
    pub fn new() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.origin.elapsed())
            .ok()
            .and_then(|delta| self.wall_origin.checked_add_signed(delta))
            .unwrap_or(self.wall_origin)
    }
}
