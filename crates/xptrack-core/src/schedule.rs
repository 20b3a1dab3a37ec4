//! Caller-side collection cadence.
//!
//! Sweeps alternate between a large page range and a small one. The wait
//! before the next sweep grows by one step after a success and shrinks by one
//! step after a failure, clamped to `[min, max]`.

use chrono::Duration;
use serde::Serialize;

use crate::config::{CollectorConfig, ScheduleConfig, minutes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sweep {
    Large,
    Small,
}

impl Sweep {
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Large => Self::Small,
            Self::Small => Self::Large,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    next_sweep: Sweep,
    wait: Duration,
    min_wait: Duration,
    max_wait: Duration,
    step: Duration,
    small_pages: u32,
    large_pages: u32,
}

impl Scheduler {
    #[must_use]
    pub fn new(schedule: &ScheduleConfig, collector: &CollectorConfig) -> Self {
        let min_wait = minutes(schedule.min_wait_minutes);
        let max_wait = minutes(schedule.max_wait_minutes).max(min_wait);
        Self {
            next_sweep: Sweep::Large,
            wait: minutes(schedule.initial_wait_minutes).clamp(min_wait, max_wait),
            min_wait,
            max_wait,
            step: minutes(schedule.step_minutes),
            small_pages: collector.small_pages.max(1),
            large_pages: collector.large_pages.max(1),
        }
    }

    /// The sweep to run next and its page numbers (1-based, inclusive).
    #[must_use]
    pub fn next_sweep(&self) -> (Sweep, std::ops::RangeInclusive<u32>) {
        let last = match self.next_sweep {
            Sweep::Large => self.large_pages,
            Sweep::Small => self.small_pages,
        };
        (self.next_sweep, 1..=last)
    }

    /// Record a sweep outcome and return how long to wait before the next one.
    pub fn complete(&mut self, success: bool) -> Duration {
        self.wait = if success {
            (self.wait + self.step).min(self.max_wait)
        } else {
            (self.wait - self.step).max(self.min_wait)
        };
        self.next_sweep = self.next_sweep.next();
        self.wait
    }

    #[must_use]
    pub const fn current_wait(&self) -> Duration {
        self.wait
    }
}
