use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

use crate::model::Ms;

/// Source of "now". The engine never reads the system clock directly so
/// expiry and search can be driven from tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn local_datetime(ms: Ms, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(&offset))
}

/// Calendar date of `ms` in the service time zone.
pub fn local_date(ms: Ms, offset: FixedOffset) -> Option<NaiveDate> {
    local_datetime(ms, offset).map(|dt| dt.date_naive())
}

/// Clock time of `ms` in the service time zone.
pub fn time_of_day(ms: Ms, offset: FixedOffset) -> Option<NaiveTime> {
    local_datetime(ms, offset).map(|dt| dt.time())
}

/// Inverse of `local_date` + `time_of_day`.
pub fn local_ms(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<Ms> {
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.timestamp_millis())
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}
