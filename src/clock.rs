// src/clock.rs

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of "now" for the service layer. The engine itself only ever receives explicit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock shifted to the office time zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes * 60).map(|offset| Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Clone)]
pub struct FixedClock {
    current_time: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set_time(&self, at: NaiveDateTime) {
        if let Ok(mut current) = self.current_time.lock() {
            *current = at;
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut current) = self.current_time.lock() {
            *current += duration;
        }
    }

    pub fn now_date(&self) -> NaiveDate {
        self.now().date()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.current_time
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let start = NaiveDateTime::parse_from_str("2026-03-02 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(11));
        assert_eq!(clock.now(), start + Duration::minutes(11));
        let shared = clock.clone();
        shared.set_time(start + Duration::days(1));
        assert_eq!(clock.now_date(), start.date().succ_opt().unwrap());
    }

    #[test]
    fn system_clock_rejects_out_of_range_offsets() {
        assert!(SystemClock::with_offset_minutes(330).is_some());
        assert!(SystemClock::with_offset_minutes(24 * 60).is_none());
    }
}
