use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{NaiveTime, Utc};

/// Millisecond clock whose stamps never repeat or go backwards within a
/// process, even when the wall clock does.
#[derive(Debug, Default)]
pub struct StrictClock {
    last_ms: AtomicI64,
}

impl StrictClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> i64 {
        self.stamp_at(Utc::now().timestamp_millis())
    }

    pub fn stamp_at(&self, now_ms: i64) -> i64 {
        let mut previous = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(previous.saturating_add(1));
            match self.last_ms.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(current) => previous = current,
            }
        }
    }
}

/// Unix seconds of today's UTC midnight.
pub fn today_midnight_unix() -> i64 {
    Utc::now()
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp()
}
