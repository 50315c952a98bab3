//! Largest-Triangle-Three-Buckets downsampling of per-cell time series
//!
//! ```text
//!   day axis:  p0 | b1 b1 b1 | b2 b2 b2 | ... | b(T-2) | p(n-1)
//!              kept  pick 1    pick 1            pick 1    kept
//! ```
//!
//! Each cell's series over a span is gap-filled (a missing day carries the
//! previous day's value forward) and reduced to `T` points. From every
//! bucket the point forming the largest triangle with the previously kept
//! point and the average of the next bucket is retained.

use crate::calendar::Timestamp;
use crate::condense::{CondenseCounters, CondensedSample};
use crate::error::EngineResult;
use crate::grid::{Baseline, GridStack, SanityRange};
use serde::{Deserialize, Serialize};

/// Smallest usable target: first point, last point, one bucket
pub const MIN_TARGET: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownsamplePolicy {
    /// Points to keep per cell and span
    pub target: usize,
    pub sanity: SanityRange,
}

impl Default for DownsamplePolicy {
    fn default() -> Self {
        Self {
            target: 10,
            sanity: SanityRange::unbounded(),
        }
    }
}

impl DownsamplePolicy {
    pub fn new(target: usize, sanity: SanityRange) -> Self {
        Self { target, sanity }
    }

    /// Target clamped to [`MIN_TARGET`]
    pub fn effective_target(&self) -> usize {
        self.target.max(MIN_TARGET)
    }

    pub fn condense(
        &self,
        stack: &GridStack,
        baseline: &Baseline,
        counters: &mut CondenseCounters,
    ) -> EngineResult<Vec<CondensedSample>> {
        for (_, grid) in stack.present() {
            baseline.ensure_compatible(grid)?;
        }

        let target = self.effective_target();
        let mut samples = Vec::new();

        for row in 0..baseline.rows() {
            for col in 0..baseline.cols() {
                if baseline.get(row, col).is_none() {
                    counters.no_baseline += stack.present_count() as u64;
                    counters.examined += stack.present_count() as u64;
                    continue;
                }

                let series: Vec<(Timestamp, Option<f64>)> = stack
                    .iter()
                    .map(|(day, grid)| {
                        let value = grid.and_then(|g| {
                            counters.examined += 1;
                            let v = g.get(row, col);
                            match v {
                                None => counters.nodata += 1,
                                Some(x) if !self.sanity.contains(x) => counters.out_of_range += 1,
                                Some(_) => {}
                            }
                            v.filter(|x| self.sanity.contains(*x))
                        });
                        (day, value)
                    })
                    .collect();

                let filled = gap_fill(&series);
                counters.candidates += filled.len() as u64;
                let points: Vec<(f64, f64)> = filled
                    .iter()
                    .map(|(day, v)| (day.days() as f64, *v))
                    .collect();

                samples.extend(lttb(&points, target).into_iter().map(|i| CondensedSample {
                    row,
                    col,
                    day: filled[i].0,
                    value: filled[i].1,
                }));
            }
        }

        samples.sort_by_key(|s| (s.day, s.row, s.col));
        counters.emitted += samples.len() as u64;
        Ok(samples)
    }
}

/// Carry the last seen value into missing days.
///
/// Leading missing days have nothing to carry and are dropped.
pub fn gap_fill(series: &[(Timestamp, Option<f64>)]) -> Vec<(Timestamp, f64)> {
    let mut last = None;
    series
        .iter()
        .filter_map(|&(day, value)| {
            if value.is_some() {
                last = value;
            }
            last.map(|v| (day, v))
        })
        .collect()
}

/// Indices of the points LTTB keeps, in ascending order.
///
/// Returns every index when the input has no more than `target` points;
/// otherwise exactly `target` indices including the first and last.
pub fn lttb(points: &[(f64, f64)], target: usize) -> Vec<usize> {
    let n = points.len();
    let target = target.max(MIN_TARGET);
    if n <= target {
        return (0..n).collect();
    }

    let buckets = target - 2;
    let interior = n - 2;
    let bucket_start = |i: usize| 1 + i * interior / buckets;

    let mut kept = Vec::with_capacity(target);
    kept.push(0);
    let mut a = 0;

    for i in 0..buckets {
        let (start, end) = (bucket_start(i), bucket_start(i + 1));
        let next = if i + 1 < buckets {
            &points[end..bucket_start(i + 2)]
        } else {
            &points[n - 1..]
        };
        let len = next.len() as f64;
        let avg_x = next.iter().map(|p| p.0).sum::<f64>() / len;
        let avg_y = next.iter().map(|p| p.1).sum::<f64>() / len;

        let (ax, ay) = points[a];
        let mut best = start;
        let mut best_area = f64::NEG_INFINITY;
        for (j, &(x, y)) in points.iter().enumerate().take(end).skip(start) {
            let area = ((ax - avg_x) * (y - ay) - (ax - x) * (avg_y - ay)).abs() * 0.5;
            if area > best_area {
                best_area = area;
                best = j;
            }
        }
        kept.push(best);
        a = best;
    }

    kept.push(n - 1);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Increment, TimeSpan};
    use crate::grid::Grid;

    fn wave(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| (i as f64, ((i as f64) * 0.37).sin() * 50.0 + (i % 7) as f64))
            .collect()
    }

    #[test]
    fn test_output_length_and_endpoints() {
        for n in [3usize, 4, 10, 31, 92, 366] {
            let points = wave(n);
            for target in 3..=n {
                let kept = lttb(&points, target);
                assert_eq!(kept.len(), target, "n={} target={}", n, target);
                assert_eq!(kept[0], 0);
                assert_eq!(*kept.last().unwrap(), n - 1);
                assert!(kept.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn test_short_series_returned_whole() {
        assert_eq!(lttb(&wave(5), 8), vec![0, 1, 2, 3, 4]);
        assert!(lttb(&[], 5).is_empty());
    }

    #[test]
    fn test_target_clamped_to_three() {
        let kept = lttb(&wave(20), 1);
        assert_eq!(kept.len(), 3);
        assert_eq!(DownsamplePolicy::new(0, SanityRange::unbounded()).effective_target(), 3);
    }

    #[test]
    fn test_peak_is_selected() {
        let mut points: Vec<(f64, f64)> = (0..30).map(|i| (i as f64, 0.0)).collect();
        points[13].1 = 100.0;
        let kept = lttb(&points, 3);
        assert_eq!(kept, vec![0, 13, 29]);
    }

    #[test]
    fn test_gap_fill_carries_forward() {
        let d = |i| Timestamp::from_days(i);
        let series = vec![
            (d(0), None),
            (d(1), Some(5.0)),
            (d(2), None),
            (d(3), None),
            (d(4), Some(7.0)),
            (d(5), None),
        ];
        let filled = gap_fill(&series);
        assert_eq!(
            filled,
            vec![(d(1), 5.0), (d(2), 5.0), (d(3), 5.0), (d(4), 7.0), (d(5), 7.0)]
        );
    }

    #[test]
    fn test_condense_stack_per_cell() {
        let start = Timestamp::from_ymd(2001, 6, 1).unwrap();
        let span = TimeSpan::segment(start, Increment::Jja);
        let mut stack = GridStack::new(span);
        for (i, day) in span.days().enumerate() {
            if i % 10 == 5 {
                continue;
            }
            let mut grid = Grid::filled(2, 2, i as f64);
            grid.set(1, 1, None);
            stack.insert(day, grid).unwrap();
        }
        let mut mean = Grid::filled(2, 2, 0.0);
        mean.set(0, 1, None);
        let baseline = Baseline::new(mean, Grid::filled(2, 2, 1.0)).unwrap();

        let policy = DownsamplePolicy::new(8, SanityRange::unbounded());
        let mut counters = CondenseCounters::default();
        let samples = policy.condense(&stack, &baseline, &mut counters).unwrap();

        let per_cell = |r, c| samples.iter().filter(|s| s.row == r && s.col == c).count();
        assert_eq!(per_cell(0, 0), 8);
        assert_eq!(per_cell(1, 0), 8);
        assert_eq!(per_cell(0, 1), 0);
        assert_eq!(per_cell(1, 1), 0);

        let first = samples.iter().find(|s| (s.row, s.col) == (0, 0)).unwrap();
        assert_eq!(first.day, span.start);
        assert_eq!(first.value, 0.0);
        let last = samples.iter().filter(|s| (s.row, s.col) == (0, 0)).last().unwrap();
        assert_eq!(last.day, span.end);
        assert_eq!(last.value, 91.0);
        assert_eq!(counters.emitted, 16);
    }
}
