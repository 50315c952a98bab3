//! Calendar arithmetic
//!
//! - **timestamp**: day-index [`Timestamp`] with derived calendar fields
//! - **increment**: the [`Increment`] enumeration (week, month, season, year)
//! - **span**: [`TimeSpan`] segmentation and the [`TimeSpanWalker`]

pub mod increment;
pub mod span;
pub mod timestamp;

pub use increment::{Increment, ParseIncrementError};
pub use span::{next_day, TimeSpan, TimeSpanWalker};
pub use timestamp::{days_in_month, is_leap_year, Timestamp};
