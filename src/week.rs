//! Friday-to-Thursday week keys.

use crate::error::Result;
use crate::utils::parse_date;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weekday every budget week starts on.
pub const WEEK_START_DAY: Weekday = Weekday::Fri;

/// Identifies a 7-day budget period by its first day (always a Friday).
///
/// `WeekKey::containing` is idempotent (`containing(k.start()) == k`) and
/// monotonic in its input date. Deserializing any date yields the week
/// containing it, so a key read from JSON is always a Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct WeekKey(NaiveDate);

impl<'de> Deserialize<'de> for WeekKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        NaiveDate::deserialize(deserializer).map(Self::containing)
    }
}

impl WeekKey {
    pub fn containing(date: NaiveDate) -> Self {
        let offset = (7 + date.weekday().num_days_from_monday()
            - WEEK_START_DAY.num_days_from_monday())
            % 7;
        Self(date - Days::new(u64::from(offset)))
    }

    pub fn parse(value: &str) -> Result<Self> {
        parse_date(value).map(Self::containing)
    }

    pub fn start(&self) -> NaiveDate {
        self.0
    }

    pub fn end(&self) -> NaiveDate {
        self.0 + Days::new(6)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date <= self.end()
    }

    pub fn next(&self) -> Self {
        Self(self.0 + Days::new(7))
    }

    pub fn prev(&self) -> Self {
        Self(self.0 - Days::new(7))
    }

    pub fn day(&self, weekday: Weekday) -> NaiveDate {
        let offset = (7 + weekday.num_days_from_monday() - WEEK_START_DAY.num_days_from_monday()) % 7;
        self.0 + Days::new(u64::from(offset))
    }

    /// The seven dates of the week, in order.
    pub fn days(&self) -> WeekDays {
        WeekDays {
            start: self.0,
            next: 0,
        }
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for WeekKey {
    type Err = crate::error::BudgetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<NaiveDate> for WeekKey {
    fn from(date: NaiveDate) -> Self {
        Self::containing(date)
    }
}

/// Finite, restartable sequence of the 7 days in a week. Cloning restarts
/// from the clone point without affecting the original.
#[derive(Debug, Clone)]
pub struct WeekDays {
    start: NaiveDate,
    next: u64,
}

impl Iterator for WeekDays {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.next >= 7 {
            return None;
        }
        let day = self.start + Days::new(self.next);
        self.next += 1;
        Some(day)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (7 - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for WeekDays {}
