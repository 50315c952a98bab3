//! Core grid data structures

use crate::calendar::{TimeSpan, Timestamp};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Offsets of the 8 cells surrounding a grid cell
const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Hard validity bounds for raw sensor values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanityRange {
    pub min: f64,
    pub max: f64,
}

impl Default for SanityRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SanityRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// The value itself, or `OutOfRangeValue`
    pub fn check(&self, value: f64) -> EngineResult<f64> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(EngineError::OutOfRangeValue {
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// A dense 2-D grid of one day's samples.
///
/// Absent cells are `None`; the NODATA sentinel only exists at the file
/// boundary (see [`Grid::from_raw`] and [`Grid::to_raw`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<f64>>,
}

impl Grid {
    /// Grid with every cell absent
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// Grid with every cell set to `value`
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            cells: vec![Some(value); rows * cols],
        }
    }

    /// Grid from row-major cells
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<Option<f64>>) -> EngineResult<Self> {
        if cells.len() != rows * cols {
            return Err(EngineError::GridShape {
                expected_rows: rows,
                expected_cols: cols,
                rows: cells.len() / cols.max(1),
                cols,
            });
        }
        Ok(Self { rows, cols, cells })
    }

    /// Grid from row-major raw values, mapping `nodata` (and NaN) to absent
    pub fn from_raw(rows: usize, cols: usize, raw: &[f64], nodata: f64) -> EngineResult<Self> {
        let cells = raw
            .iter()
            .map(|&v| (v != nodata && !v.is_nan()).then_some(v))
            .collect();
        Self::from_cells(rows, cols, cells)
    }

    /// Row-major raw values with absent cells written as `nodata`
    pub fn to_raw(&self, nodata: f64) -> Vec<f64> {
        self.cells.iter().map(|c| c.unwrap_or(nodata)).collect()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Row-major index of a cell
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Cell value; `None` when absent or out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells[self.index(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) {
        if row < self.rows && col < self.cols {
            let idx = self.index(row, col);
            self.cells[idx] = value;
        }
    }

    pub fn cells(&self) -> &[Option<f64>] {
        &self.cells
    }

    /// Iterate `(row, col, value)` in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Option<f64>)> + '_ {
        let cols = self.cols.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, v)| (i / cols, i % cols, *v))
    }

    /// In-bounds cells of the 3x3 ring around `(row, col)`
    pub fn neighbors(&self, row: usize, col: usize) -> impl Iterator<Item = (usize, usize)> {
        let (rows, cols) = (self.rows as isize, self.cols as isize);
        let (r, c) = (row as isize, col as isize);
        NEIGHBOR_OFFSETS.iter().filter_map(move |(dr, dc)| {
            let (nr, nc) = (r + dr, c + dc);
            (nr >= 0 && nr < rows && nc >= 0 && nc < cols).then(|| (nr as usize, nc as usize))
        })
    }

    /// Number of present cells
    pub fn valid_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Fail unless the grid is `rows x cols`
    pub fn ensure_shape(&self, rows: usize, cols: usize) -> EngineResult<()> {
        if self.rows != rows || self.cols != cols {
            return Err(EngineError::GridShape {
                expected_rows: rows,
                expected_cols: cols,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Drop values outside `range`, returning how many were dropped
    pub fn retain_range(&mut self, range: &SanityRange) -> usize {
        let mut dropped = 0;
        for cell in self.cells.iter_mut() {
            if let Some(v) = *cell {
                if !range.contains(v) {
                    *cell = None;
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// Day grids of one span, indexed by offset from the span start.
///
/// A day with no source data stays `None`; it is never replaced by an
/// all-absent grid.
#[derive(Debug, Clone)]
pub struct GridStack {
    span: TimeSpan,
    days: Vec<Option<Grid>>,
}

impl GridStack {
    pub fn new(span: TimeSpan) -> Self {
        Self {
            span,
            days: vec![None; span.day_count() as usize],
        }
    }

    pub fn span(&self) -> &TimeSpan {
        &self.span
    }

    /// Place a day's grid; fails for a day outside the span
    pub fn insert(&mut self, day: Timestamp, grid: Grid) -> EngineResult<()> {
        let offset = self.span.offset_of(day).ok_or(EngineError::InvalidSpan {
            increment: self.span.increment,
            anchor: day,
            start: self.span.start,
            final_day: self.span.end,
        })?;
        self.days[offset] = Some(grid);
        Ok(())
    }

    pub fn get(&self, day: Timestamp) -> Option<&Grid> {
        self.span
            .offset_of(day)
            .and_then(|offset| self.days[offset].as_ref())
    }

    /// Every day of the span with its grid, if any
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, Option<&Grid>)> + '_ {
        self.span.days().zip(self.days.iter().map(|g| g.as_ref()))
    }

    /// Days that have a grid
    pub fn present(&self) -> impl Iterator<Item = (Timestamp, &Grid)> + '_ {
        self.iter().filter_map(|(day, grid)| grid.map(|g| (day, g)))
    }

    pub fn present_count(&self) -> usize {
        self.days.iter().filter(|g| g.is_some()).count()
    }

    pub fn missing_days(&self) -> Vec<Timestamp> {
        self.iter()
            .filter(|(_, g)| g.is_none())
            .map(|(day, _)| day)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Increment;

    #[test]
    fn test_raw_conversion_at_the_edge() {
        let grid = Grid::from_raw(2, 2, &[1.0, -32768.0, f64::NAN, 4.0], -32768.0).unwrap();
        assert_eq!(grid.get(0, 0), Some(1.0));
        assert_eq!(grid.get(0, 1), None);
        assert_eq!(grid.get(1, 0), None);
        assert_eq!(grid.valid_count(), 2);
        assert_eq!(grid.to_raw(-1.0), vec![1.0, -1.0, -1.0, 4.0]);
    }

    #[test]
    fn test_shape_checked() {
        assert!(Grid::from_cells(2, 3, vec![None; 5]).is_err());
        let grid = Grid::new(2, 3);
        assert!(grid.ensure_shape(2, 3).is_ok());
        assert!(matches!(
            grid.ensure_shape(3, 2),
            Err(EngineError::GridShape { .. })
        ));
    }

    #[test]
    fn test_neighbors_at_corner_edge_and_center() {
        let grid = Grid::new(5, 5);
        assert_eq!(grid.neighbors(0, 0).count(), 3);
        assert_eq!(grid.neighbors(0, 2).count(), 5);
        assert_eq!(grid.neighbors(2, 2).count(), 8);
        assert!(!grid.neighbors(2, 2).any(|c| c == (2, 2)));
    }

    #[test]
    fn test_retain_range() {
        let mut grid = Grid::from_cells(1, 4, vec![Some(-1.0), Some(5.0), None, Some(11.0)]).unwrap();
        let dropped = grid.retain_range(&SanityRange::new(0.0, 10.0));
        assert_eq!(dropped, 2);
        assert_eq!(grid.cells(), &[None, Some(5.0), None, None]);
    }

    #[test]
    fn test_sanity_check() {
        let range = SanityRange::new(0.0, 10.0);
        assert_eq!(range.check(10.0).unwrap(), 10.0);
        assert!(matches!(
            range.check(10.5),
            Err(EngineError::OutOfRangeValue { .. })
        ));
        assert!(SanityRange::unbounded().contains(1e300));
    }

    #[test]
    fn test_stack_keeps_missing_days_absent() {
        let start = Timestamp::from_ymd(2001, 2, 1).unwrap();
        let span = TimeSpan::segment(start, Increment::month(2).unwrap());
        let mut stack = GridStack::new(span);
        assert_eq!(stack.len(), 28);

        stack.insert(start.add_days(3), Grid::filled(2, 2, 1.0)).unwrap();
        assert_eq!(stack.present_count(), 1);
        assert_eq!(stack.missing_days().len(), 27);
        assert!(stack.get(start.add_days(3)).is_some());
        assert!(stack.get(start).is_none());
        assert!(stack.insert(start.add_days(40), Grid::new(2, 2)).is_err());
    }
}
