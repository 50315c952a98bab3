//! # Condense
//!
//! Climatology and condensation engine for long records of daily gridded
//! satellite data. Per-cell baselines (mean and standard deviation) are built
//! for a calendar increment over many years, then each day is reduced to
//! the sparse set of samples worth keeping and written to a store.
//!
//! ## Features
//!
//! - **Calendar increments**: weeks, named months, seasons (DJF crosses the
//!   year), years, with leap-year aware spans
//! - **Two-pass statistics**: per-cell mean, sample standard deviation and
//!   population with NODATA kept out of every sum
//! - **Condensation policies**: pass-through, k-sigma threshold with
//!   neighbour confirmation, per-span extremes, LTTB downsampling
//! - **Stores**: in-memory, flat append-only tables, SQLite
//! - **Predicate queries**: `value > 300 AND month = 2 LIMIT 10`
//!
//! ## Modules
//!
//! - [`calendar`]: day indices, increments and span walking
//! - [`grid`]: grids, locations, baselines and their files
//! - [`stats`]: statistics accumulator
//! - [`condense`]: condensation engine and policies
//! - [`store`]: the [`GriddedStore`] trait and its backends
//! - [`query`]: predicate language
//! - [`pipeline`]: sources, climatology and condensation runs, workers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use condense::calendar::{Increment, Timestamp};
//! use condense::condense::{Policy, ThresholdPolicy};
//! use condense::grid::{Baseline, Grid, LocationGrid};
//! use condense::pipeline::{run_condense, CondenseSettings, FixedBaseline, MemoryGridSource};
//! use condense::store::MemoryStore;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let day = Timestamp::from_ymd(2000, 1, 1).ok_or("bad date")?;
//!     let source = MemoryGridSource::new(2, 2).with_day(day, Grid::filled(2, 2, 250.0))?;
//!     let baseline = Baseline::new(Grid::filled(2, 2, 200.0), Grid::filled(2, 2, 10.0))?;
//!
//!     let store = MemoryStore::new();
//!     let settings = CondenseSettings {
//!         start: day,
//!         final_day: day,
//!         increment: Increment::Day,
//!         policy: Policy::Threshold(ThresholdPolicy::default()),
//!         clean: true,
//!     };
//!     let report = run_condense(
//!         &source,
//!         &mut FixedBaseline::new(baseline),
//!         &LocationGrid::plain(2, 2),
//!         &store,
//!         &settings,
//!     )?;
//!
//!     println!("Kept {} samples", report.samples_stored);
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod condense;
pub mod config;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod query;
pub mod stats;
pub mod store;

// Re-export top-level types for convenience
pub use calendar::{Increment, TimeSpan, TimeSpanWalker, Timestamp};

pub use grid::{Baseline, Grid, GridStack, Location, LocationGrid, SanityRange};

pub use stats::StatisticsAccumulator;

pub use condense::{CondensationEngine, CondensedSample, CondenseCounters, Policy, PolicyKind};

pub use store::{
    open_store, BackendKind, FlatStore, GriddedStore, MemoryStore, Metadata, RelationalStore,
    Sample, StoreError, StoreResult, StoreStats,
};

pub use query::{parse_predicate, Predicate, QueryError};

pub use pipeline::{
    run_climatology, run_condense, run_workers, BaselineDirectory, BaselineProvider, Channel,
    ClimatologySettings, CondenseSettings, FlatGridSource, GridSource, MemoryGridSource,
};

pub use error::{EngineError, EngineResult};

pub use config::{Config, ConfigError, LoggingConfig};
