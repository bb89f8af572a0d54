// src/calendar.rs

use chrono::{Datelike, Month, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::error::ValidationReason;
use crate::model::Session;

/// Monthly bucket key in "MMMM-YYYY" form, e.g. `October-2026`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32, // 1-12
}

static MONTH_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)-(\d{4})\s*$").expect("static month key pattern"));

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    fn month_name(&self) -> &'static str {
        Month::try_from(self.month as u8)
            .map(|m| m.name())
            .unwrap_or("Invalid")
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.month_name(), self.year)
    }
}

impl FromStr for MonthKey {
    type Err = ValidationReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationReason::MalformedMonth {
            value: s.to_string(),
        };
        let caps = MONTH_KEY_PATTERN.captures(s).ok_or_else(malformed)?;
        // chrono's Month parser also takes three letter abbreviations; only full names are valid keys
        let name = &caps[1];
        let month = name.parse::<Month>().map_err(|_| malformed())?;
        if !month.name().eq_ignore_ascii_case(name) {
            return Err(malformed());
        }
        let year = caps[2].parse::<i32>().map_err(|_| malformed())?;
        Ok(Self {
            year,
            month: month.number_from_month(),
        })
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Counts Monday to Friday dates in `start..=end`. Returns zero when `end < start`.
pub fn count_business_days(start: NaiveDate, end: NaiveDate) -> Decimal {
    if end < start {
        return Decimal::ZERO;
    }
    let days = start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !is_weekend(*d))
        .count();
    Decimal::from(days)
}

/// True only for a half-day session on a single date.
pub fn is_half_day(start: NaiveDate, end: NaiveDate, session: Session) -> bool {
    session == Session::HalfDay && start == end
}

/// Day amount charged for a WFH span: 0.5 for a half day, otherwise the business day count.
pub fn wfh_days(start: NaiveDate, end: NaiveDate, session: Session) -> Result<Decimal, ValidationReason> {
    if session == Session::HalfDay && start != end {
        return Err(ValidationReason::HalfDaySpanMismatch {
            start_date: start,
            end_date: end,
        });
    }
    if is_half_day(start, end, session) {
        Ok(dec!(0.5))
    } else {
        Ok(count_business_days(start, end))
    }
}
