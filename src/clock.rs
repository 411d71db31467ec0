//! Time source for calendar keys and cache expiry.
//!
//! Production code uses [`SystemClock`]. Tests drive a [`ManualClock`] across
//! day and month boundaries without sleeping.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time. Day and month keys derive from this.
    fn now_local(&self) -> NaiveDateTime;

    /// Current time as unix seconds. Cache ages derive from this.
    fn now_unix(&self) -> u64;

    /// `YYYY-MM-DD` for today.
    fn today_key(&self) -> String {
        self.now_local().format("%Y-%m-%d").to_string()
    }

    /// `YYYY-MM` for the current month.
    fn month_key(&self) -> String {
        self.now_local().format("%Y-%m").to_string()
    }
}

/// Wall clock in the local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_unix(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Start the clock at `start`, interpreted as both local and UTC time.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at midday on the given date.
    ///
    /// Returns `None` for an invalid date.
    pub fn at_date(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
        Some(Self::new(date.and_hms_opt(12, 0, 0)?))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now_local(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_unix(&self) -> u64 {
        let utc: DateTime<Utc> = Utc.from_utc_datetime(&self.now_local());
        utc.timestamp().max(0) as u64
    }
}
