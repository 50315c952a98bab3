//! Span segmentation and the increment walker
//!
//! ```text
//!   anchor day ──segment()──▶ [start ............ end]  day_count
//!                                 │
//!                                 └─ next_day() ─▶ start+1 ─▶ ... ─▶ end ─▶ None
//!
//!   TimeSpanWalker(start, final, FEB):
//!     [Feb 2000] ─▶ [Feb 2001] ─▶ ... ─▶ [Feb N] ─▶ (start > final) stop
//! ```

use crate::calendar::increment::Increment;
use crate::calendar::timestamp::{days_in_month, Timestamp};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed range of days belonging to one increment occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: Timestamp,
    pub end: Timestamp,
    pub increment: Increment,
}

impl TimeSpan {
    /// Canonical span of `increment` anchored at `anchor`.
    ///
    /// Named months and seasons resolve in the anchor's year (DJF runs from
    /// December of that year into the next February). `None` has no extent
    /// of its own and yields the anchor day alone.
    pub fn segment(anchor: Timestamp, increment: Increment) -> Self {
        let year = anchor.year();
        let (start, end) = match increment {
            Increment::None | Increment::Day => (anchor, anchor),
            Increment::Week => (anchor, anchor.add_days(6)),
            Increment::Month(m) => month_bounds(year, m.number_from_month()),
            Increment::Year => (Timestamp::civil(year, 1, 1), Timestamp::civil(year, 12, 31)),
            Increment::Djf => (
                Timestamp::civil(year, 12, 1),
                month_bounds(year + 1, 2).1,
            ),
            Increment::Mam => (Timestamp::civil(year, 3, 1), Timestamp::civil(year, 5, 31)),
            Increment::Jja => (Timestamp::civil(year, 6, 1), Timestamp::civil(year, 8, 31)),
            Increment::Son => (Timestamp::civil(year, 9, 1), Timestamp::civil(year, 11, 30)),
        };
        Self {
            start,
            end,
            increment,
        }
    }

    /// Like [`TimeSpan::segment`], but fails when the span would start after
    /// `final_day`.
    pub fn segment_within(
        anchor: Timestamp,
        increment: Increment,
        final_day: Timestamp,
    ) -> EngineResult<Self> {
        let span = Self::segment(anchor, increment);
        if span.start > final_day {
            return Err(EngineError::InvalidSpan {
                increment,
                anchor,
                start: span.start,
                final_day,
            });
        }
        Ok(span)
    }

    /// An explicit range with no increment semantics
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            increment: Increment::None,
        }
    }

    /// Number of days covered, inclusive of both ends
    pub fn day_count(&self) -> u32 {
        (self.end.days_since(self.start) + 1).max(0) as u32
    }

    pub fn contains(&self, day: Timestamp) -> bool {
        self.start <= day && day <= self.end
    }

    /// Position of `day` within the span
    pub fn offset_of(&self, day: Timestamp) -> Option<usize> {
        self.contains(day)
            .then(|| day.days_since(self.start) as usize)
    }

    /// Day after `current`, or `None` once the span is exhausted
    pub fn next_day(&self, current: Timestamp) -> Option<Timestamp> {
        next_day(current, self.end)
    }

    /// All days of the span in order
    pub fn days(&self) -> impl Iterator<Item = Timestamp> {
        (self.start.days()..=self.end.days()).map(Timestamp::from_days)
    }

    /// Intersection with `[from, to]`
    pub fn clip(self, from: Timestamp, to: Timestamp) -> Self {
        Self {
            start: self.start.max(from),
            end: self.end.min(to),
            increment: self.increment,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..{} ({} days)",
            self.increment,
            self.start,
            self.end,
            self.day_count()
        )
    }
}

/// Day after `current` unless that would pass `end`
pub fn next_day(current: Timestamp, end: Timestamp) -> Option<Timestamp> {
    let next = current.next();
    (next <= end).then_some(next)
}

fn month_bounds(year: i32, month: u32) -> (Timestamp, Timestamp) {
    (
        Timestamp::civil(year, month, 1),
        Timestamp::civil(year, month, days_in_month(year, month)),
    )
}

/// Walks successive increment occurrences between a start and a final day.
///
/// Every yielded span is clipped to `[start, final_day]`. Annual increments
/// advance one year at a time; `Day` and `Week` tile the range; `None` yields
/// the whole range once.
#[derive(Debug, Clone)]
pub struct TimeSpanWalker {
    increment: Increment,
    start: Timestamp,
    final_day: Timestamp,
    anchor: Timestamp,
    done: bool,
}

impl TimeSpanWalker {
    pub fn new(start: Timestamp, final_day: Timestamp, increment: Increment) -> EngineResult<Self> {
        if start > final_day {
            return Err(EngineError::InvalidSpan {
                increment,
                anchor: start,
                start,
                final_day,
            });
        }
        Ok(Self {
            increment,
            start,
            final_day,
            anchor: start,
            done: false,
        })
    }

    pub fn increment(&self) -> Increment {
        self.increment
    }

    /// Requested range as a single span
    pub fn range(&self) -> TimeSpan {
        TimeSpan::between(self.start, self.final_day)
    }

    fn advance(&mut self, span: &TimeSpan) {
        self.anchor = if self.increment.is_annual() {
            Timestamp::civil(span.start.year() + 1, 1, 1)
        } else {
            span.end.next()
        };
    }
}

impl Iterator for TimeSpanWalker {
    type Item = TimeSpan;

    fn next(&mut self) -> Option<TimeSpan> {
        while !self.done {
            if self.increment == Increment::None {
                self.done = true;
                return Some(self.range());
            }

            let span = match TimeSpan::segment_within(self.anchor, self.increment, self.final_day) {
                Ok(span) => span,
                Err(_) => {
                    self.done = true;
                    break;
                }
            };
            self.advance(&span);

            // Occurrence lies wholly before the requested start
            if span.end < self.start {
                continue;
            }
            return Some(span.clip(self.start, self.final_day));
        }
        None
    }
}
