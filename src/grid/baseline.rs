//! Per-cell reference statistics

use crate::error::EngineResult;
use crate::grid::types::Grid;

/// Mean and standard deviation of one cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellStats {
    pub mean: f64,
    pub sd: f64,
}

impl CellStats {
    /// `[mean - k*sd, mean + k*sd]`
    pub fn bounds(&self, k: f64) -> (f64, f64) {
        (self.mean - k * self.sd, self.mean + k * self.sd)
    }

    /// Whether `value` lies strictly outside the k-sigma band
    pub fn is_outside(&self, value: f64, k: f64) -> bool {
        let (low, high) = self.bounds(k);
        value < low || value > high
    }
}

/// Co-indexed mean and standard-deviation grids for one increment.
///
/// A cell with no population is absent in both grids.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    mean: Grid,
    sd: Grid,
}

impl Baseline {
    pub fn new(mean: Grid, sd: Grid) -> EngineResult<Self> {
        sd.ensure_shape(mean.rows(), mean.cols())?;
        Ok(Self { mean, sd })
    }

    pub fn mean(&self) -> &Grid {
        &self.mean
    }

    pub fn sd(&self) -> &Grid {
        &self.sd
    }

    pub fn rows(&self) -> usize {
        self.mean.rows()
    }

    pub fn cols(&self) -> usize {
        self.mean.cols()
    }

    /// Statistics for a cell, `None` when either grid lacks it
    pub fn get(&self, row: usize, col: usize) -> Option<CellStats> {
        Some(CellStats {
            mean: self.mean.get(row, col)?,
            sd: self.sd.get(row, col)?,
        })
    }

    /// Fail unless `grid` has the baseline's extent
    pub fn ensure_compatible(&self, grid: &Grid) -> EngineResult<()> {
        grid.ensure_shape(self.rows(), self.cols())
    }
}
