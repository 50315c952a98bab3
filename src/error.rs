//! Engine error types
//!
//! Missing source days and out-of-range values are recovered where they
//! occur; every other kind aborts the unit of work that raised it.

use crate::calendar::{Increment, Timestamp};
use crate::store::{BackendKind, StoreError};
use thiserror::Error;

/// Errors raised by the climatology and condensation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A day's grid could not be obtained
    #[error("Missing source grid for {day}")]
    MissingSourceDay { day: Timestamp },

    /// An increment anchored at `anchor` would start after the final day
    #[error("Invalid span: {increment} anchored at {anchor} starts {start}, after final day {final_day}")]
    InvalidSpan {
        increment: Increment,
        anchor: Timestamp,
        start: Timestamp,
        final_day: Timestamp,
    },

    /// No reference statistics exist for the day being condensed
    #[error("No baseline available for {increment} covering {day}")]
    BaselineUnavailable { increment: Increment, day: Timestamp },

    /// A store connection could not be opened or a write failed
    #[error("Store unavailable ({backend} backend, {operation}): {source}")]
    StoreUnavailable {
        backend: BackendKind,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// A span policy's span would need more than one baseline
    #[error("{increment} span from {start} is condensed against the {first} baseline, but {day} belongs to {other}")]
    SpanCrossesBaselines {
        increment: Increment,
        start: Timestamp,
        first: Increment,
        day: Timestamp,
        other: Increment,
    },

    /// A value failed the hard sanity range
    #[error("Value {value} outside sanity range [{min}, {max}]")]
    OutOfRangeValue { value: f64, min: f64, max: f64 },

    /// A grid does not match the configured extent
    #[error("Grid shape mismatch: expected {expected_rows}x{expected_cols}, found {rows}x{cols}")]
    GridShape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    /// The second statistics pass saw different data than the first
    #[error("Inconsistent accumulation passes: {first} values in pass 1, {second} in pass 2")]
    InconsistentPasses { first: u64, second: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Wrap a backend failure with the operation that triggered it
    pub fn store(backend: BackendKind, operation: &'static str, source: StoreError) -> Self {
        EngineError::StoreUnavailable {
            backend,
            operation,
            source,
        }
    }

    /// Whether processing may continue past this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::MissingSourceDay { .. } | EngineError::OutOfRangeValue { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::MissingSourceDay {
            day: Timestamp::from_ymd(2000, 2, 3).unwrap(),
        };
        assert_eq!(err.to_string(), "Missing source grid for 2000-02-03");

        let err = EngineError::store(BackendKind::Flat, "store_sample", StoreError::NotConnected);
        assert_eq!(
            err.to_string(),
            "Store unavailable (flat backend, store_sample): Store is not connected"
        );

        let err = EngineError::SpanCrossesBaselines {
            increment: Increment::Djf,
            start: Timestamp::from_ymd(2000, 12, 1).unwrap(),
            first: Increment::month(12).unwrap(),
            day: Timestamp::from_ymd(2001, 1, 1).unwrap(),
            other: Increment::month(1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "DJF span from 2000-12-01 is condensed against the DEC baseline, but 2001-01-01 belongs to JAN"
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_kinds() {
        let missing = EngineError::MissingSourceDay {
            day: Timestamp::from_days(0),
        };
        let range = EngineError::OutOfRangeValue {
            value: -5.0,
            min: 0.0,
            max: 10.0,
        };
        let baseline = EngineError::BaselineUnavailable {
            increment: Increment::Djf,
            day: Timestamp::from_days(0),
        };
        assert!(missing.is_recoverable());
        assert!(range.is_recoverable());
        assert!(!baseline.is_recoverable());
    }
}
