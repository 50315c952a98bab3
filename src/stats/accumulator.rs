//! Two-pass per-cell statistics
//!
//! ```text
//!   pass 1: StatisticsAccumulator   Σx, n per cell ──finish_mean()──▶ mean
//!   pass 2: DeviationAccumulator    Σ(x - mean)² per cell ──finish()──▶ sd
//! ```
//!
//! Both passes must see the same grids; the second pass re-reads them from
//! the source and [`DeviationAccumulator::finish`] rejects a second pass
//! whose per-cell populations differ from the first.

use crate::error::{EngineError, EngineResult};
use crate::grid::{Baseline, Grid, GridStack};

/// Number of contributing days per cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationGrid {
    rows: usize,
    cols: usize,
    counts: Vec<u32>,
}

impl PopulationGrid {
    pub fn get(&self, row: usize, col: usize) -> u32 {
        if row >= self.rows || col >= self.cols {
            return 0;
        }
        self.counts[row * self.cols + col]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Total contributing values across all cells
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&n| n as u64).sum()
    }

    /// Cells with at least one contributing day
    pub fn populated_cells(&self) -> usize {
        self.counts.iter().filter(|&&n| n > 0).count()
    }
}

/// Output of a completed two-pass accumulation
#[derive(Debug, Clone)]
pub struct AccumulatedBaseline {
    pub baseline: Baseline,
    pub population: PopulationGrid,
    /// Days that supplied a grid in the first pass
    pub days: usize,
}

/// First pass: running sums and populations
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    rows: usize,
    cols: usize,
    sums: Vec<f64>,
    population: Vec<u32>,
    days: usize,
}

impl StatisticsAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            sums: vec![0.0; rows * cols],
            population: vec![0; rows * cols],
            days: 0,
        }
    }

    /// Add one day's grid
    pub fn accumulate(&mut self, grid: &Grid) -> EngineResult<()> {
        grid.ensure_shape(self.rows, self.cols)?;
        for ((sum, n), cell) in self
            .sums
            .iter_mut()
            .zip(self.population.iter_mut())
            .zip(grid.cells())
        {
            if let Some(v) = cell {
                *sum += v;
                *n += 1;
            }
        }
        self.days += 1;
        Ok(())
    }

    /// Add every present day of a stack; returns the days used
    pub fn accumulate_stack(&mut self, stack: &GridStack) -> EngineResult<usize> {
        let mut used = 0;
        for (_, grid) in stack.present() {
            self.accumulate(grid)?;
            used += 1;
        }
        tracing::debug!(
            "Pass 1 over {}: {} days used, {} missing",
            stack.span(),
            used,
            stack.len() - used
        );
        Ok(used)
    }

    pub fn days(&self) -> usize {
        self.days
    }

    /// Close the first pass and compute the mean grid
    pub fn finish_mean(self) -> EngineResult<DeviationAccumulator> {
        let cells = self
            .sums
            .iter()
            .zip(&self.population)
            .map(|(&sum, &n)| (n > 0).then(|| sum / n as f64))
            .collect();
        let mean = Grid::from_cells(self.rows, self.cols, cells)?;

        Ok(DeviationAccumulator {
            rows: self.rows,
            cols: self.cols,
            mean,
            population: self.population,
            squared: vec![0.0; self.rows * self.cols],
            second_population: vec![0; self.rows * self.cols],
            days: self.days,
        })
    }
}

/// Second pass: squared deviations from the first-pass mean
#[derive(Debug, Clone)]
pub struct DeviationAccumulator {
    rows: usize,
    cols: usize,
    mean: Grid,
    population: Vec<u32>,
    squared: Vec<f64>,
    second_population: Vec<u32>,
    days: usize,
}

impl DeviationAccumulator {
    pub fn mean(&self) -> &Grid {
        &self.mean
    }

    /// Add one day's grid; must be a day seen in the first pass
    pub fn accumulate(&mut self, grid: &Grid) -> EngineResult<()> {
        grid.ensure_shape(self.rows, self.cols)?;
        for (((sq, n), mean), cell) in self
            .squared
            .iter_mut()
            .zip(self.second_population.iter_mut())
            .zip(self.mean.cells())
            .zip(grid.cells())
        {
            if let (Some(v), Some(m)) = (cell, mean) {
                let d = v - m;
                *sq += d * d;
                *n += 1;
            }
        }
        Ok(())
    }

    pub fn accumulate_stack(&mut self, stack: &GridStack) -> EngineResult<usize> {
        let mut used = 0;
        for (_, grid) in stack.present() {
            self.accumulate(grid)?;
            used += 1;
        }
        tracing::debug!("Pass 2 over {}: {} days used", stack.span(), used);
        Ok(used)
    }

    /// Compute the standard deviation grid.
    ///
    /// `sd = sqrt(Σ(x - mean)² / max(n - 1, 1))`; cells with no population
    /// stay absent in both grids.
    pub fn finish(self) -> EngineResult<AccumulatedBaseline> {
        if self.population != self.second_population {
            let first = self.population.iter().map(|&n| n as u64).sum();
            let second = self.second_population.iter().map(|&n| n as u64).sum();
            return Err(EngineError::InconsistentPasses { first, second });
        }

        let cells = self
            .squared
            .iter()
            .zip(&self.population)
            .map(|(&sq, &n)| (n > 0).then(|| (sq / n.saturating_sub(1).max(1) as f64).sqrt()))
            .collect();
        let sd = Grid::from_cells(self.rows, self.cols, cells)?;
        let baseline = Baseline::new(self.mean, sd)?;

        Ok(AccumulatedBaseline {
            baseline,
            population: PopulationGrid {
                rows: self.rows,
                cols: self.cols,
                counts: self.population,
            },
            days: self.days,
        })
    }
}
