//! Gridded data model
//!
//! - **types**: [`Grid`], [`GridStack`] and the [`SanityRange`] filter
//! - **location**: [`Location`] identities and the [`LocationGrid`]
//! - **baseline**: [`Baseline`] mean/sd pairs
//! - **io**: flat row-major grid files and baseline artifacts
//!
//! ```text
//!   raw file (i16, NODATA) ──read_i16_grid──▶ Grid (Option<f64> cells)
//!   Grid ──retain_range(SanityRange)──▶ Grid
//!   Baseline ──write_baseline──▶ climate-*-mean-*.bin + climate-*-sd-*.bin
//! ```

pub mod baseline;
pub mod io;
pub mod location;
pub mod types;

pub use baseline::{Baseline, CellStats};
pub use io::{
    find_baseline, read_baseline, read_f64_grid, read_f64_values, read_i16_grid, write_baseline,
    write_f64_grid, write_i16_grid, write_manifest, BaselineFiles, BaselineManifest, BaselineName,
    StatKind,
};
pub use location::{Location, LocationGrid};
pub use types::{Grid, GridStack, SanityRange};

/// Legacy NODATA sentinel of 2-byte raw grids
pub const DEFAULT_NODATA: f64 = -32768.0;
