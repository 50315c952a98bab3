//! Day-resolution timestamps
//!
//! A [`Timestamp`] is a whole-day index counted from 1970-01-01 (day 0).
//! Calendar fields are read through [`chrono::NaiveDate`], which bounds
//! them to chrono's supported range (about 262,000 years either side of
//! year 0); indices beyond it saturate at the nearest representable date.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Day 0
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// A calendar day, stored as days since 1970-01-01
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i32);

impl Timestamp {
    /// Timestamp from a raw day index
    pub const fn from_days(days: i32) -> Self {
        Self(days)
    }

    /// Timestamp from a calendar date, `None` if the date does not exist
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from)
    }

    /// Day index of a date already known to be valid. Dates chrono cannot
    /// represent saturate at its range.
    pub(crate) fn civil(year: i32, month: u32, day: u32) -> Self {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or(if year < 1970 {
            NaiveDate::MIN
        } else {
            NaiveDate::MAX
        });
        Self::from(date)
    }

    /// Raw day index
    pub fn days(self) -> i32 {
        self.0
    }

    /// The calendar date of this index
    pub fn date(self) -> NaiveDate {
        epoch()
            .checked_add_signed(Duration::days(i64::from(self.0)))
            .unwrap_or(if self.0 < 0 {
                NaiveDate::MIN
            } else {
                NaiveDate::MAX
            })
    }

    /// (year, month, day-of-month)
    pub fn ymd(self) -> (i32, u32, u32) {
        let date = self.date();
        (date.year(), date.month(), date.day())
    }

    pub fn year(self) -> i32 {
        self.date().year()
    }

    pub fn month(self) -> u32 {
        self.date().month()
    }

    pub fn day(self) -> u32 {
        self.date().day()
    }

    /// Day of year, 1-based (1..=366)
    pub fn day_of_year(self) -> u32 {
        self.date().ordinal()
    }

    /// The following day
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The preceding day
    pub fn prev(self) -> Self {
        Self(self.0 - 1)
    }

    /// Shift by a signed number of days
    pub fn add_days(self, days: i32) -> Self {
        Self(self.0 + days)
    }

    /// Whole days from `earlier` to `self`
    pub fn days_since(self, earlier: Timestamp) -> i32 {
        self.0 - earlier.0
    }

    /// First day of this timestamp's month
    pub fn first_of_month(self) -> Self {
        let date = self.date();
        Self::from(date.with_day(1).unwrap_or(date))
    }

    /// Conversion to a chrono date, `None` outside chrono's range
    pub fn to_naive_date(self) -> Option<NaiveDate> {
        epoch().checked_add_signed(Duration::days(i64::from(self.0)))
    }
}

impl From<NaiveDate> for Timestamp {
    fn from(date: NaiveDate) -> Self {
        // chrono's whole range is under 200M days, well inside i32
        Self(date.signed_duration_since(epoch()).num_days() as i32)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date().format("%Y-%m-%d"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    /// Parses `YYYY-MM-DD`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map(Timestamp::from)
    }
}

/// Whether `year` has a 29 February
pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

/// Length of a month in days; 0 for a month outside 1..=12
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (NaiveDate::from_ymd_opt(year, month, 1), next_first) {
        (Some(_), Some(next)) => next.pred_opt().map_or(0, |last| last.day()),
        _ => 0,
    }
}
