//! Time source injected into billing services
//!
//! Subscription state (trial, grace period) is always evaluated against a
//! `Clock` so that services never read the wall clock directly.

use std::sync::RwLock;

use time::{Date, Duration, OffsetDateTime, Time};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Midnight at the start of the current day, in the clock's offset
    fn today(&self) -> OffsetDateTime {
        self.now().replace_time(Time::MIDNIGHT)
    }

    /// Calendar date of the current day
    fn today_date(&self) -> Date {
        self.now().date()
    }
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually driven clock for tests and sandbox runs
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
