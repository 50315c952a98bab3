//! Temporal increments used to group days into baseline periods

use crate::calendar::timestamp::Timestamp;
use chrono::Month;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Unknown increment name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown increment: {0}")]
pub struct ParseIncrementError(pub String);

/// A named temporal bucket.
///
/// Named months and seasons recur once per year; `Day` and `Week` tile the
/// calendar; `None` treats a whole requested range as one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Increment {
    None,
    Day,
    Week,
    Month(Month),
    Year,
    /// December through February, crossing a year boundary
    Djf,
    /// March through May
    Mam,
    /// June through August
    Jja,
    /// September through November
    Son,
}

impl Increment {
    /// Named month increment from a 1-based month number
    pub fn month(number: u32) -> Option<Self> {
        MONTHS
            .get((number as usize).checked_sub(1)?)
            .map(|m| Increment::Month(*m))
    }

    /// The monthly increment containing `day`
    pub fn month_of(day: Timestamp) -> Self {
        Increment::Month(MONTHS[(day.month() - 1) as usize])
    }

    /// The meteorological season containing `day`
    pub fn season_of(day: Timestamp) -> Self {
        match day.month() {
            12 | 1 | 2 => Increment::Djf,
            3..=5 => Increment::Mam,
            6..=8 => Increment::Jja,
            _ => Increment::Son,
        }
    }

    /// Canonical first month, for increments anchored to one
    pub fn start_month(self) -> Option<u32> {
        match self {
            Increment::Month(m) => Some(m.number_from_month()),
            Increment::Year => Some(1),
            Increment::Djf => Some(12),
            Increment::Mam => Some(3),
            Increment::Jja => Some(6),
            Increment::Son => Some(9),
            Increment::None | Increment::Day | Increment::Week => None,
        }
    }

    /// Upper bound on the days one span can hold; `None` when unbounded
    pub fn max_days(self) -> Option<u32> {
        let days = match self {
            Increment::None => return None,
            Increment::Day => 1,
            Increment::Week => 7,
            Increment::Month(Month::February) => 29,
            Increment::Month(Month::April)
            | Increment::Month(Month::June)
            | Increment::Month(Month::September)
            | Increment::Month(Month::November) => 30,
            Increment::Month(_) => 31,
            Increment::Year => 366,
            Increment::Djf | Increment::Son => 91,
            Increment::Mam | Increment::Jja => 92,
        };
        Some(days)
    }

    /// Whether one span of this increment covers two calendar years
    pub fn crosses_year(self) -> bool {
        matches!(self, Increment::Djf)
    }

    /// Whether this increment recurs once per calendar year
    pub fn is_annual(self) -> bool {
        matches!(
            self,
            Increment::Month(_)
                | Increment::Year
                | Increment::Djf
                | Increment::Mam
                | Increment::Jja
                | Increment::Son
        )
    }

    pub fn is_seasonal(self) -> bool {
        matches!(
            self,
            Increment::Djf | Increment::Mam | Increment::Jja | Increment::Son
        )
    }

    /// Short upper-case name used in file names and logs
    pub fn name(self) -> &'static str {
        match self {
            Increment::None => "NONE",
            Increment::Day => "DAY",
            Increment::Week => "WEEK",
            Increment::Month(m) => MONTH_ABBREVIATIONS[(m.number_from_month() - 1) as usize],
            Increment::Year => "YEAR",
            Increment::Djf => "DJF",
            Increment::Mam => "MAM",
            Increment::Jja => "JJA",
            Increment::Son => "SON",
        }
    }
}

impl fmt::Display for Increment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Increment {
    type Err = ParseIncrementError;

    /// Accepts the short names plus full month names, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let inc = match upper.as_str() {
            "NONE" => Increment::None,
            "DAY" | "DAILY" => Increment::Day,
            "WEEK" | "WEEKLY" => Increment::Week,
            "YEAR" | "YEARLY" | "ANNUAL" => Increment::Year,
            "DJF" | "WINTER" => Increment::Djf,
            "MAM" | "SPRING" => Increment::Mam,
            "JJA" | "SUMMER" => Increment::Jja,
            "SON" | "AUTUMN" | "FALL" => Increment::Son,
            other => {
                let idx = MONTHS
                    .iter()
                    .position(|m| m.name().eq_ignore_ascii_case(other))
                    .or_else(|| MONTH_ABBREVIATIONS.iter().position(|a| *a == other))
                    .ok_or_else(|| ParseIncrementError(s.to_string()))?;
                Increment::Month(MONTHS[idx])
            }
        };
        Ok(inc)
    }
}

impl TryFrom<String> for Increment {
    type Error = ParseIncrementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Increment> for String {
    fn from(inc: Increment) -> Self {
        inc.name().to_string()
    }
}
