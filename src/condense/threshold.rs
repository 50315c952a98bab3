//! Threshold-with-adjacency condensation
//!
//! A cell is a candidate when its value passes the sanity range and lies
//! outside `[mean - k*sd, mean + k*sd]`. A candidate is kept when at least
//! `min_adjacent` of its 8 neighbours are candidates too.

use crate::calendar::Timestamp;
use crate::condense::{CondenseCounters, CondensedSample};
use crate::error::EngineResult;
use crate::grid::{Baseline, Grid, SanityRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    /// Band half-width in standard deviations
    pub k: f64,
    pub sanity: SanityRange,
    /// Candidate neighbours required to confirm a candidate; 0 keeps all
    pub min_adjacent: usize,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            k: 2.0,
            sanity: SanityRange::unbounded(),
            min_adjacent: 2,
        }
    }
}

impl ThresholdPolicy {
    pub fn new(k: f64, sanity: SanityRange, min_adjacent: usize) -> Self {
        Self {
            k,
            sanity,
            min_adjacent,
        }
    }

    /// Per-cell candidate mask for one day
    pub fn candidates(
        &self,
        grid: &Grid,
        baseline: &Baseline,
        counters: &mut CondenseCounters,
    ) -> Vec<bool> {
        grid.iter()
            .map(|(row, col, value)| {
                counters.examined += 1;
                let Some(v) = value else {
                    counters.nodata += 1;
                    return false;
                };
                if !self.sanity.contains(v) {
                    counters.out_of_range += 1;
                    return false;
                }
                let Some(stats) = baseline.get(row, col) else {
                    counters.no_baseline += 1;
                    return false;
                };
                stats.is_outside(v, self.k)
            })
            .collect()
    }

    /// Whether enough neighbours of `(row, col)` are candidates.
    ///
    /// Stops scanning as soon as `min_adjacent` have been found.
    pub fn confirmed(&self, grid: &Grid, mask: &[bool], row: usize, col: usize) -> bool {
        if self.min_adjacent == 0 {
            return true;
        }
        grid.neighbors(row, col)
            .filter(|&(r, c)| mask[grid.index(r, c)])
            .take(self.min_adjacent)
            .count()
            >= self.min_adjacent
    }

    pub fn condense(
        &self,
        day: Timestamp,
        grid: &Grid,
        baseline: &Baseline,
        counters: &mut CondenseCounters,
    ) -> EngineResult<Vec<CondensedSample>> {
        baseline.ensure_compatible(grid)?;
        let mask = self.candidates(grid, baseline, counters);

        let mut samples = Vec::new();
        for (row, col, value) in grid.iter() {
            if !mask[grid.index(row, col)] {
                continue;
            }
            counters.candidates += 1;
            if let (true, Some(value)) = (self.confirmed(grid, &mask, row, col), value) {
                samples.push(CondensedSample {
                    row,
                    col,
                    day,
                    value,
                });
            }
        }
        counters.emitted += samples.len() as u64;
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_baseline(rows: usize, cols: usize, mean: f64, sd: f64) -> Baseline {
        Baseline::new(Grid::filled(rows, cols, mean), Grid::filled(rows, cols, sd)).unwrap()
    }

    fn day() -> Timestamp {
        Timestamp::from_ymd(2000, 1, 7).unwrap()
    }

    #[test]
    fn test_isolated_spike_kept_without_adjacency() {
        let baseline = Baseline::new(
            Grid::filled(5, 5, 140.0),
            Grid::filled(5, 5, 16000f64.sqrt()),
        )
        .unwrap();
        let mut grid = Grid::filled(5, 5, 100.0);
        grid.set(2, 2, Some(500.0));

        let policy = ThresholdPolicy::new(2.0, SanityRange::new(0.0, 1000.0), 0);
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();

        assert_eq!(
            samples,
            vec![CondensedSample {
                row: 2,
                col: 2,
                day: day(),
                value: 500.0
            }]
        );
        assert_eq!(counters.examined, 25);
        assert_eq!(counters.emitted, 1);
    }

    #[test]
    fn test_isolated_spike_rejected_with_adjacency() {
        let baseline = uniform_baseline(5, 5, 100.0, 10.0);
        let mut grid = Grid::filled(5, 5, 100.0);
        grid.set(2, 2, Some(500.0));

        let policy = ThresholdPolicy::new(2.0, SanityRange::unbounded(), 1);
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();
        assert!(samples.is_empty());
        assert_eq!(counters.candidates, 1);
    }

    #[test]
    fn test_cluster_confirms_itself() {
        let baseline = uniform_baseline(5, 5, 100.0, 10.0);
        let mut grid = Grid::filled(5, 5, 100.0);
        for (r, c) in [(1, 1), (1, 2), (2, 1)] {
            grid.set(r, c, Some(50.0));
        }
        grid.set(4, 4, Some(300.0));

        let policy = ThresholdPolicy::new(2.0, SanityRange::unbounded(), 2);
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();
        let cells: Vec<_> = samples.iter().map(|s| (s.row, s.col)).collect();
        assert_eq!(cells, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_never_emits_inside_band_or_out_of_range() {
        let baseline = uniform_baseline(3, 3, 100.0, 10.0);
        let grid = Grid::from_cells(
            3,
            3,
            vec![
                Some(120.0),
                Some(80.0),
                Some(121.0),
                Some(5000.0),
                None,
                Some(-1.0),
                Some(79.0),
                Some(100.0),
                Some(130.0),
            ],
        )
        .unwrap();

        let policy = ThresholdPolicy::new(2.0, SanityRange::new(0.0, 1000.0), 0);
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();
        let values: Vec<_> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![121.0, 79.0, 130.0]);
        assert_eq!(counters.out_of_range, 2);
        assert_eq!(counters.nodata, 1);
        for s in &samples {
            let stats = baseline.get(s.row, s.col).unwrap();
            assert!(stats.is_outside(s.value, 2.0));
        }
    }

    #[test]
    fn test_cells_without_baseline_ignored() {
        let mut mean = Grid::filled(2, 2, 100.0);
        mean.set(0, 0, None);
        let mut sd = Grid::filled(2, 2, 1.0);
        sd.set(0, 0, None);
        let baseline = Baseline::new(mean, sd).unwrap();
        let grid = Grid::filled(2, 2, 900.0);

        let policy = ThresholdPolicy::new(1.0, SanityRange::unbounded(), 0);
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(counters.no_baseline, 1);
        assert!(samples.iter().all(|s| (s.row, s.col) != (0, 0)));
    }

    #[test]
    fn test_emitted_samples_meet_adjacency() {
        let baseline = uniform_baseline(6, 6, 0.0, 1.0);
        let mut grid = Grid::filled(6, 6, 0.0);
        for (r, c) in [(0, 0), (0, 1), (3, 3), (3, 4), (4, 3), (4, 4), (5, 0)] {
            grid.set(r, c, Some(10.0));
        }
        for min_adjacent in 0..=4 {
            let policy = ThresholdPolicy::new(2.0, SanityRange::unbounded(), min_adjacent);
            let mut counters = CondenseCounters::default();
            let mask = policy.candidates(&grid, &baseline, &mut counters.clone());
            let samples = policy.condense(day(), &grid, &baseline, &mut counters).unwrap();
            for s in samples {
                let qualifying = grid
                    .neighbors(s.row, s.col)
                    .filter(|&(r, c)| mask[grid.index(r, c)])
                    .count();
                assert!(qualifying >= min_adjacent);
            }
        }
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let baseline = uniform_baseline(2, 2, 0.0, 1.0);
        let policy = ThresholdPolicy::default();
        let mut counters = CondenseCounters::default();
        assert!(policy
            .condense(day(), &Grid::new(3, 3), &baseline, &mut counters)
            .is_err());
    }
}
