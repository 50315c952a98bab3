//! Condensation of daily grids into sparse samples
//!
//! - **threshold**: k-sigma anomalies confirmed by neighbouring anomalies
//! - **extremes**: running per-cell minimum and maximum over a span
//! - **lttb**: per-cell time-series downsampling
//!
//! ```text
//!   Grid (day) ─┐
//!               ├─▶ CondensationEngine(policy) ─▶ Vec<CondensedSample> ─▶ GriddedStore
//!   Baseline ───┘
//! ```
//!
//! All policies drop absent values and ignore cells without a baseline.
//! Every policy except pass-through fails with `BaselineUnavailable` when
//! no baseline is supplied.

pub mod extremes;
pub mod lttb;
pub mod threshold;

pub use extremes::{ExtremesPolicy, ExtremesTracker};
pub use lttb::{gap_fill, lttb, DownsamplePolicy, MIN_TARGET};
pub use threshold::ThresholdPolicy;

use crate::calendar::{Increment, TimeSpan, Timestamp};
use crate::error::{EngineError, EngineResult};
use crate::grid::{Baseline, Grid, GridStack, SanityRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A retained observation, before it is given store ids
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CondensedSample {
    pub row: usize,
    pub col: usize,
    pub day: Timestamp,
    pub value: f64,
}

/// Per-run tallies of what condensation saw and kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CondenseCounters {
    pub examined: u64,
    pub nodata: u64,
    pub out_of_range: u64,
    pub no_baseline: u64,
    pub candidates: u64,
    pub emitted: u64,
}

impl CondenseCounters {
    /// Share of examined cell-days that were kept, in percent
    pub fn retained_percent(&self) -> f64 {
        if self.examined == 0 {
            return 0.0;
        }
        self.emitted as f64 / self.examined as f64 * 100.0
    }

    pub fn merge(&mut self, other: &CondenseCounters) {
        self.examined += other.examined;
        self.nodata += other.nodata;
        self.out_of_range += other.out_of_range;
        self.no_baseline += other.no_baseline;
        self.candidates += other.candidates;
        self.emitted += other.emitted;
    }
}

impl fmt::Display for CondenseCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined: {}, nodata: {}, out of range: {}, no baseline: {}, candidates: {}, kept: {} ({:.4}%)",
            self.examined,
            self.nodata,
            self.out_of_range,
            self.no_baseline,
            self.candidates,
            self.emitted,
            self.retained_percent()
        )
    }
}

/// Policy selector as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Keep every valid value
    None,
    #[default]
    Threshold,
    Extremes,
    Downsample,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::None => "none",
            PolicyKind::Threshold => "threshold",
            PolicyKind::Extremes => "extremes",
            PolicyKind::Downsample => "downsample",
        };
        f.write_str(name)
    }
}

/// A configured condensation policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    PassThrough { sanity: SanityRange },
    Threshold(ThresholdPolicy),
    Extremes(ExtremesPolicy),
    Downsample(DownsamplePolicy),
}

impl Policy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::PassThrough { .. } => PolicyKind::None,
            Policy::Threshold(_) => PolicyKind::Threshold,
            Policy::Extremes(_) => PolicyKind::Extremes,
            Policy::Downsample(_) => PolicyKind::Downsample,
        }
    }

    pub fn requires_baseline(&self) -> bool {
        !matches!(self, Policy::PassThrough { .. })
    }

    /// Whether the policy decides each day independently
    pub fn is_per_day(&self) -> bool {
        matches!(self, Policy::PassThrough { .. } | Policy::Threshold(_))
    }
}

/// Applies one policy to days or spans, keeping running counters
#[derive(Debug, Clone)]
pub struct CondensationEngine {
    policy: Policy,
    counters: CondenseCounters,
}

impl CondensationEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            counters: CondenseCounters::default(),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn counters(&self) -> &CondenseCounters {
        &self.counters
    }

    fn require<'a>(
        &self,
        baseline: Option<&'a Baseline>,
        increment: Increment,
        day: Timestamp,
    ) -> EngineResult<Option<&'a Baseline>> {
        match baseline {
            None if self.policy.requires_baseline() => {
                Err(EngineError::BaselineUnavailable { increment, day })
            }
            other => Ok(other),
        }
    }

    /// Condense a single day.
    ///
    /// Span policies treat the day as a one-day span.
    pub fn condense_day(
        &mut self,
        day: Timestamp,
        grid: &Grid,
        baseline: Option<&Baseline>,
    ) -> EngineResult<Vec<CondensedSample>> {
        let baseline = self.require(baseline, Increment::Day, day)?;
        match (self.policy, baseline) {
            (Policy::PassThrough { sanity }, _) => {
                Ok(pass_through(day, grid, &sanity, &mut self.counters))
            }
            (Policy::Threshold(p), Some(b)) => p.condense(day, grid, b, &mut self.counters),
            _ => {
                let mut stack = GridStack::new(TimeSpan::between(day, day));
                stack.insert(day, grid.clone())?;
                self.condense_span(&stack, baseline)
            }
        }
    }

    /// Condense every present day of a span
    pub fn condense_span(
        &mut self,
        stack: &GridStack,
        baseline: Option<&Baseline>,
    ) -> EngineResult<Vec<CondensedSample>> {
        let span = *stack.span();
        let baseline = self.require(baseline, span.increment, span.start)?;
        let counters = &mut self.counters;

        match (self.policy, baseline) {
            (Policy::PassThrough { sanity }, _) => Ok(stack
                .present()
                .flat_map(|(day, grid)| pass_through(day, grid, &sanity, counters))
                .collect()),
            (Policy::Threshold(p), Some(b)) => {
                let mut samples = Vec::new();
                for (day, grid) in stack.present() {
                    samples.extend(p.condense(day, grid, b, counters)?);
                }
                Ok(samples)
            }
            (Policy::Extremes(p), Some(b)) => {
                let mut tracker = p.tracker(b.rows(), b.cols());
                for (day, grid) in stack.present() {
                    tracker.observe(day, grid, b, counters)?;
                }
                Ok(tracker.finish(counters))
            }
            (Policy::Downsample(p), Some(b)) => p.condense(stack, b, counters),
            (_, None) => Err(EngineError::BaselineUnavailable {
                increment: span.increment,
                day: span.start,
            }),
        }
    }
}

fn pass_through(
    day: Timestamp,
    grid: &Grid,
    sanity: &SanityRange,
    counters: &mut CondenseCounters,
) -> Vec<CondensedSample> {
    let mut samples = Vec::new();
    for (row, col, value) in grid.iter() {
        counters.examined += 1;
        match value {
            None => counters.nodata += 1,
            Some(v) if !sanity.contains(v) => counters.out_of_range += 1,
            Some(value) => samples.push(CondensedSample {
                row,
                col,
                day,
                value,
            }),
        }
    }
    counters.candidates += samples.len() as u64;
    counters.emitted += samples.len() as u64;
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsAccumulator;

    fn spike_stack() -> GridStack {
        let start = Timestamp::from_ymd(2000, 1, 1).unwrap();
        let span = TimeSpan::between(start, start.add_days(9));
        let mut stack = GridStack::new(span);
        for (i, day) in span.days().enumerate() {
            let mut grid = Grid::filled(5, 5, 100.0);
            if i == 6 {
                grid.set(2, 2, Some(500.0));
            }
            stack.insert(day, grid).unwrap();
        }
        stack
    }

    fn baseline_of(stack: &GridStack) -> Baseline {
        let mut pass1 = StatisticsAccumulator::new(5, 5);
        pass1.accumulate_stack(stack).unwrap();
        let mut pass2 = pass1.finish_mean().unwrap();
        pass2.accumulate_stack(stack).unwrap();
        pass2.finish().unwrap().baseline
    }

    #[test]
    fn test_end_to_end_spike_scenario() {
        let stack = spike_stack();
        let baseline = baseline_of(&stack);
        let policy = ThresholdPolicy::new(2.0, SanityRange::new(0.0, 1000.0), 0);
        let mut engine = CondensationEngine::new(Policy::Threshold(policy));

        let samples = engine.condense_span(&stack, Some(&baseline)).unwrap();
        assert_eq!(samples.len(), 1);
        let s = samples[0];
        assert_eq!((s.row, s.col, s.value), (2, 2, 500.0));
        assert_eq!(s.day, Timestamp::from_ymd(2000, 1, 7).unwrap());
        assert_eq!(engine.counters().emitted, 1);
        assert_eq!(engine.counters().examined, 250);
    }

    #[test]
    fn test_missing_baseline_is_fatal() {
        let stack = spike_stack();
        for policy in [
            Policy::Threshold(ThresholdPolicy::default()),
            Policy::Extremes(ExtremesPolicy::default()),
            Policy::Downsample(DownsamplePolicy::default()),
        ] {
            let mut engine = CondensationEngine::new(policy);
            let err = engine.condense_span(&stack, None).unwrap_err();
            assert!(matches!(err, EngineError::BaselineUnavailable { .. }));
            assert!(!err.is_recoverable());
        }
    }

    #[test]
    fn test_pass_through_keeps_valid_values_without_baseline() {
        let mut grid = Grid::filled(2, 2, 10.0);
        grid.set(0, 0, None);
        grid.set(1, 1, Some(-50.0));
        let mut engine = CondensationEngine::new(Policy::PassThrough {
            sanity: SanityRange::new(0.0, 100.0),
        });
        let day = Timestamp::from_days(100);
        let samples = engine.condense_day(day, &grid, None).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(engine.counters().nodata, 1);
        assert_eq!(engine.counters().out_of_range, 1);
    }

    #[test]
    fn test_extremes_through_engine() {
        let stack = spike_stack();
        let baseline = baseline_of(&stack);
        let mut engine = CondensationEngine::new(Policy::Extremes(ExtremesPolicy::new(
            2.0,
            SanityRange::new(0.0, 1000.0),
        )));
        let samples = engine.condense_span(&stack, Some(&baseline)).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 500.0);
    }

    #[test]
    fn test_span_policy_on_a_single_day() {
        let baseline = Baseline::new(Grid::filled(1, 1, 0.0), Grid::filled(1, 1, 1.0)).unwrap();
        let mut engine = CondensationEngine::new(Policy::Downsample(DownsamplePolicy::default()));
        let day = Timestamp::from_days(5);
        let samples = engine
            .condense_day(day, &Grid::filled(1, 1, 3.0), Some(&baseline))
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].day, day);
    }

    #[test]
    fn test_counters_display_and_merge() {
        let mut a = CondenseCounters {
            examined: 200,
            emitted: 1,
            ..Default::default()
        };
        a.merge(&CondenseCounters {
            examined: 200,
            emitted: 3,
            ..Default::default()
        });
        assert_eq!(a.retained_percent(), 1.0);
        assert!(a.to_string().contains("kept: 4"));
    }

    #[test]
    fn test_policy_kind_serde() {
        let kind: PolicyKind = serde_json::from_str("\"downsample\"").unwrap();
        assert_eq!(kind, PolicyKind::Downsample);
        assert_eq!(PolicyKind::default(), PolicyKind::Threshold);
        assert!(Policy::Threshold(ThresholdPolicy::default()).is_per_day());
        assert!(!Policy::Extremes(ExtremesPolicy::default()).is_per_day());
    }
}
