//! Driving pipeline
//!
//! ```text
//!   GridSource ──load_stack──▶ GridStack
//!        │                        │
//!        │          climatology: StatisticsAccumulator (2 passes) ──▶ baseline files
//!        │                        │
//!        └──▶ condense: BaselineProvider + CondensationEngine ──▶ GriddedStore
//! ```
//!
//! A unit of work is one sensor channel. [`run_workers`] fans channels out
//! over a bounded pool of blocking tasks and joins them all before
//! returning.

pub mod baseline;
pub mod climatology;
pub mod condense;
pub mod source;
pub mod workers;

pub use baseline::{BaselineDirectory, BaselineLookup, BaselineProvider, FixedBaseline};
pub use climatology::{run_climatology, ClimatologyReport, ClimatologySettings};
pub use condense::{run_condense, CondenseReport, CondenseSettings};
pub use source::{load_stack, FlatGridSource, GridSource, LoadedSpan, MemoryGridSource};
pub use workers::{default_worker_count, run_workers, WorkerOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sensor channel, e.g. frequency `37` with polarization `v`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Channel {
    #[serde(default)]
    pub suffix1: String,
    #[serde(default)]
    pub suffix2: String,
}

impl Channel {
    pub fn new(suffix1: &str, suffix2: &str) -> Self {
        Self {
            suffix1: suffix1.to_string(),
            suffix2: suffix2.to_string(),
        }
    }

    /// Sensor and suffixes run together, as used in artifact names
    pub fn tag(&self, sensor: &str) -> String {
        format!("{}{}{}", sensor, self.suffix1, self.suffix2)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.suffix1, self.suffix2)
    }
}
