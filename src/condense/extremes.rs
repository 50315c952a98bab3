//! Running minimum/maximum condensation
//!
//! Each cell keeps at most two samples per span: the highest value above
//! `mean + k*sd` and the lowest value below `mean - k*sd`. A later value
//! replaces the held one only when it is strictly more extreme.

use crate::calendar::Timestamp;
use crate::condense::{CondenseCounters, CondensedSample};
use crate::error::EngineResult;
use crate::grid::{Baseline, Grid, SanityRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremesPolicy {
    pub k: f64,
    pub sanity: SanityRange,
}

impl Default for ExtremesPolicy {
    fn default() -> Self {
        Self {
            k: 2.0,
            sanity: SanityRange::unbounded(),
        }
    }
}

impl ExtremesPolicy {
    pub fn new(k: f64, sanity: SanityRange) -> Self {
        Self { k, sanity }
    }

    pub fn tracker(&self, rows: usize, cols: usize) -> ExtremesTracker {
        ExtremesTracker {
            policy: *self,
            rows,
            cols,
            high: vec![None; rows * cols],
            low: vec![None; rows * cols],
        }
    }
}

/// Per-cell running extremes over the days of one span
#[derive(Debug, Clone)]
pub struct ExtremesTracker {
    policy: ExtremesPolicy,
    rows: usize,
    cols: usize,
    high: Vec<Option<(Timestamp, f64)>>,
    low: Vec<Option<(Timestamp, f64)>>,
}

impl ExtremesTracker {
    /// Fold one day's grid into the running extremes
    pub fn observe(
        &mut self,
        day: Timestamp,
        grid: &Grid,
        baseline: &Baseline,
        counters: &mut CondenseCounters,
    ) -> EngineResult<()> {
        baseline.ensure_compatible(grid)?;
        grid.ensure_shape(self.rows, self.cols)?;

        for (row, col, value) in grid.iter() {
            counters.examined += 1;
            let Some(v) = value else {
                counters.nodata += 1;
                continue;
            };
            if !self.policy.sanity.contains(v) {
                counters.out_of_range += 1;
                continue;
            }
            let Some(stats) = baseline.get(row, col) else {
                counters.no_baseline += 1;
                continue;
            };

            let (low, high) = stats.bounds(self.policy.k);
            let idx = grid.index(row, col);
            if v > high {
                counters.candidates += 1;
                if self.high[idx].map_or(true, |(_, held)| v > held) {
                    self.high[idx] = Some((day, v));
                }
            } else if v < low {
                counters.candidates += 1;
                if self.low[idx].map_or(true, |(_, held)| v < held) {
                    self.low[idx] = Some((day, v));
                }
            }
        }
        Ok(())
    }

    /// Held extremes ordered by day, then row-major cell
    pub fn finish(self, counters: &mut CondenseCounters) -> Vec<CondensedSample> {
        let cols = self.cols.max(1);
        let mut samples: Vec<CondensedSample> = self
            .high
            .iter()
            .enumerate()
            .chain(self.low.iter().enumerate())
            .filter_map(|(idx, held)| {
                held.map(|(day, value)| CondensedSample {
                    row: idx / cols,
                    col: idx % cols,
                    day,
                    value,
                })
            })
            .collect();
        samples.sort_by_key(|s| (s.day, s.row, s.col));
        counters.emitted += samples.len() as u64;
        samples
    }
}
