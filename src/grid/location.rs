//! Grid cell identities

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// A grid cell, optionally georeferenced.
///
/// Equality is structural over row, column and coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub row: u32,
    pub col: u32,
    /// (latitude, longitude) in degrees
    pub coords: Option<(f64, f64)>,
}

impl Location {
    pub fn new(row: u32, col: u32) -> Self {
        Self {
            row,
            col,
            coords: None,
        }
    }

    pub fn with_coords(mut self, lat: f64, lon: f64) -> Self {
        self.coords = Some((lat, lon));
        self
    }

    pub fn lat(&self) -> Option<f64> {
        self.coords.map(|(lat, _)| lat)
    }

    pub fn lon(&self) -> Option<f64> {
        self.coords.map(|(_, lon)| lon)
    }
}

/// The `(row, col) -> (lat, lon)` mapping for one sensor grid
#[derive(Debug, Clone)]
pub struct LocationGrid {
    rows: usize,
    cols: usize,
    locations: Vec<Location>,
}

impl LocationGrid {
    /// Cells without coordinates
    pub fn plain(rows: usize, cols: usize) -> Self {
        let locations = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| Location::new(r as u32, c as u32)))
            .collect();
        Self {
            rows,
            cols,
            locations,
        }
    }

    /// Cells georeferenced from row-major latitude and longitude arrays.
    ///
    /// A cell whose latitude or longitude is `nodata` (or NaN) gets no
    /// coordinates.
    pub fn with_coordinates(
        rows: usize,
        cols: usize,
        lats: &[f64],
        lons: &[f64],
        nodata: f64,
    ) -> EngineResult<Self> {
        if lats.len() != rows * cols || lons.len() != rows * cols {
            return Err(EngineError::GridShape {
                expected_rows: rows,
                expected_cols: cols,
                rows: lats.len().min(lons.len()) / cols.max(1),
                cols,
            });
        }
        let valid = |v: f64| v != nodata && !v.is_nan();
        let mut grid = Self::plain(rows, cols);
        for (loc, (&lat, &lon)) in grid.locations.iter_mut().zip(lats.iter().zip(lons)) {
            if valid(lat) && valid(lon) {
                loc.coords = Some((lat, lon));
            }
        }
        Ok(grid)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Location> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.locations.get(row * self.cols + col)
    }

    /// Row-major iteration
    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Location::new(3, 4).with_coords(-70.5, 12.0);
        let b = Location::new(3, 4).with_coords(-70.5, 12.0);
        assert_eq!(a, b);
        assert_ne!(a, Location::new(3, 4));
        assert_eq!(a.lat(), Some(-70.5));
        assert_eq!(Location::new(0, 0).lon(), None);
    }

    #[test]
    fn test_plain_grid_is_row_major() {
        let grid = LocationGrid::plain(2, 3);
        let cells: Vec<_> = grid.iter().map(|l| (l.row, l.col)).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
        assert_eq!(grid.get(1, 2), Some(&Location::new(1, 2)));
        assert!(grid.get(2, 0).is_none());
    }

    #[test]
    fn test_coordinates_skip_nodata() {
        let lats = [10.0, -999.0, 30.0, 40.0];
        let lons = [1.0, 2.0, 3.0, f64::NAN];
        let grid = LocationGrid::with_coordinates(2, 2, &lats, &lons, -999.0).unwrap();
        assert_eq!(grid.get(0, 0).unwrap().coords, Some((10.0, 1.0)));
        assert_eq!(grid.get(0, 1).unwrap().coords, None);
        assert_eq!(grid.get(1, 1).unwrap().coords, None);
        assert!(LocationGrid::with_coordinates(2, 2, &lats[..3], &lons, -999.0).is_err());
    }
}
