//! Local wall-clock source, swappable in tests.

use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};

pub trait Clock: Send + Sync {
    /// Current local date and time. Quota periods are cut on this.
    fn local_now(&self) -> NaiveDateTime;

    /// `t` on the same local wall clock as [`Clock::local_now`].
    fn to_local(&self, t: DateTime<Utc>) -> NaiveDateTime {
        t.with_timezone(&Local).naive_local()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

/// Manual time is read as UTC.
impl Clock for ManualClock {
    fn local_now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn to_local(&self, t: DateTime<Utc>) -> NaiveDateTime {
        t.naive_utc()
    }
}
