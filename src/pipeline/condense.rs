//! Condensation run: daily grids in, sparse samples out to a store.
//!
//! Per-day policies stream one day at a time. Span policies (extremes,
//! downsampling) load each increment occurrence as a stack first. Locations
//! are written before anything else and a timestamp is written before any
//! sample that references it.

use crate::calendar::{Increment, TimeSpan, TimeSpanWalker, Timestamp};
use crate::condense::{CondensationEngine, CondenseCounters, CondensedSample, Policy};
use crate::error::{EngineError, EngineResult};
use crate::grid::{Grid, LocationGrid};
use crate::pipeline::baseline::BaselineProvider;
use crate::pipeline::source::{load_stack, GridSource};
use crate::store::{
    GriddedStore, LocationId, Metadata, StoreError, StoreStats, TimestampId,
};
use std::collections::BTreeMap;

/// Inputs of a condensation run
#[derive(Debug, Clone)]
pub struct CondenseSettings {
    pub start: Timestamp,
    pub final_day: Timestamp,
    /// Grouping for span policies; ignored by per-day policies
    pub increment: Increment,
    pub policy: Policy,
    /// Drop and recreate the store's tables first
    pub clean: bool,
}

/// Outcome of a condensation run
#[derive(Debug, Clone)]
pub struct CondenseReport {
    pub counters: CondenseCounters,
    pub days_processed: usize,
    pub days_missing: usize,
    pub timestamps_stored: usize,
    pub samples_stored: u64,
    pub stats: StoreStats,
}

/// Wraps store failures with the backend and the operation attempted
struct StoreWriter<'a> {
    store: &'a dyn GriddedStore,
    location_ids: Vec<LocationId>,
    cols: usize,
    timestamps: usize,
    samples: u64,
}

impl<'a> StoreWriter<'a> {
    fn new(store: &'a dyn GriddedStore, cols: usize) -> Self {
        Self {
            store,
            location_ids: Vec::new(),
            cols,
            timestamps: 0,
            samples: 0,
        }
    }

    fn check<T>(&self, operation: &'static str, result: Result<T, StoreError>) -> EngineResult<T> {
        result.map_err(|source| {
            let err = EngineError::store(self.store.kind(), operation, source);
            tracing::error!("{}", err);
            err
        })
    }

    fn open(&mut self, clean: bool, locations: &LocationGrid) -> EngineResult<()> {
        self.check("connect", self.store.connect())?;
        if clean {
            self.check("clean", self.store.clean())?;
        }
        self.location_ids = Vec::with_capacity(locations.len());
        for location in locations.iter() {
            let id = self.check("store_location", self.store.store_location(location))?;
            self.location_ids.push(id);
        }
        Ok(())
    }

    fn timestamp(&mut self, day: Timestamp) -> EngineResult<TimestampId> {
        let id = self.check("store_timestamp", self.store.store_timestamp(day))?;
        self.timestamps += 1;
        Ok(id)
    }

    fn samples(
        &mut self,
        samples: &[CondensedSample],
        timestamp_of: impl Fn(Timestamp) -> Option<TimestampId>,
    ) -> EngineResult<()> {
        let mut rows = Vec::with_capacity(samples.len());
        for sample in samples {
            let location = self.location_ids[sample.row * self.cols + sample.col];
            let timestamp = timestamp_of(sample.day).ok_or_else(|| {
                EngineError::store(
                    self.store.kind(),
                    "store_samples",
                    StoreError::InvalidReference {
                        table: "timestamps",
                        id: 0,
                    },
                )
            })?;
            rows.push((sample.value, location, timestamp));
        }
        if rows.is_empty() {
            return Ok(());
        }
        let ids = self.check("store_samples", self.store.store_samples(&rows))?;
        self.samples += ids.len() as u64;
        Ok(())
    }

    fn close(&self, rows: usize, cols: usize) -> EngineResult<StoreStats> {
        self.check(
            "store_metadata",
            self.store
                .store_metadata(&Metadata::for_grid(rows as u32, cols as u32)),
        )?;
        let stats = self.check("status", self.store.stats())?;
        self.check("disconnect", self.store.disconnect())?;
        Ok(stats)
    }
}

/// Condense every day from `settings.start` to `settings.final_day` into
/// `store`
pub fn run_condense(
    source: &dyn GridSource,
    baselines: &mut dyn BaselineProvider,
    locations: &LocationGrid,
    store: &dyn GriddedStore,
    settings: &CondenseSettings,
) -> EngineResult<CondenseReport> {
    let (rows, cols) = (source.rows(), source.cols());
    if locations.rows() != rows || locations.cols() != cols {
        return Err(EngineError::GridShape {
            expected_rows: rows,
            expected_cols: cols,
            rows: locations.rows(),
            cols: locations.cols(),
        });
    }

    let mut engine = CondensationEngine::new(settings.policy);
    let mut writer = StoreWriter::new(store, cols);
    writer.open(settings.clean, locations)?;

    tracing::info!(
        policy = %settings.policy.kind(),
        backend = %store.kind(),
        "Condensing {} to {}",
        settings.start,
        settings.final_day
    );

    let (days_processed, days_missing) = if settings.policy.is_per_day() {
        condense_days(source, baselines, &mut engine, &mut writer, settings)?
    } else {
        condense_spans(source, baselines, &mut engine, &mut writer, settings)?
    };

    let stats = writer.close(rows, cols)?;
    let counters = *engine.counters();
    tracing::info!(
        days_processed,
        days_missing,
        "Finished condensation: {}",
        counters
    );
    tracing::info!("{}", stats);

    Ok(CondenseReport {
        counters,
        days_processed,
        days_missing,
        timestamps_stored: writer.timestamps,
        samples_stored: writer.samples,
        stats,
    })
}

fn baseline_error(baselines: &dyn BaselineProvider, day: Timestamp) -> EngineError {
    let err = EngineError::BaselineUnavailable {
        increment: baselines.increment_for(day),
        day,
    };
    tracing::error!("{}", err);
    err
}

fn condense_days(
    source: &dyn GridSource,
    baselines: &mut dyn BaselineProvider,
    engine: &mut CondensationEngine,
    writer: &mut StoreWriter<'_>,
    settings: &CondenseSettings,
) -> EngineResult<(usize, usize)> {
    let mut processed = 0;
    let mut missing = 0;

    for day in TimeSpan::between(settings.start, settings.final_day).days() {
        let grid: Grid = match source.read_day(day)? {
            Some(grid) => grid,
            None => {
                missing += 1;
                tracing::warn!("{}, skipping", EngineError::MissingSourceDay { day });
                continue;
            }
        };

        let requires = engine.policy().requires_baseline();
        let baseline = baselines.baseline_for(day)?;
        if requires && baseline.is_none() {
            return Err(baseline_error(baselines, day));
        }
        let samples = engine.condense_day(day, &grid, baseline)?;

        let timestamp = writer.timestamp(day)?;
        writer.samples(&samples, |_| Some(timestamp))?;
        processed += 1;
        tracing::debug!(day = %day, kept = samples.len(), "Condensed day");
    }

    Ok((processed, missing))
}

fn condense_spans(
    source: &dyn GridSource,
    baselines: &mut dyn BaselineProvider,
    engine: &mut CondensationEngine,
    writer: &mut StoreWriter<'_>,
    settings: &CondenseSettings,
) -> EngineResult<(usize, usize)> {
    let mut processed = 0;
    let mut missing = 0;

    for span in TimeSpanWalker::new(settings.start, settings.final_day, settings.increment)? {
        let first = baselines.increment_for(span.start);
        if let Some(day) = span.days().find(|&d| baselines.increment_for(d) != first) {
            let err = EngineError::SpanCrossesBaselines {
                increment: span.increment,
                start: span.start,
                first,
                day,
                other: baselines.increment_for(day),
            };
            tracing::error!("{}", err);
            return Err(err);
        }

        let loaded = load_stack(source, span, None)?;
        missing += loaded.missing;
        if loaded.stack.present_count() == 0 {
            continue;
        }

        let baseline = baselines.baseline_for(span.start)?;
        if baseline.is_none() {
            return Err(baseline_error(baselines, span.start));
        }
        let samples = engine.condense_span(&loaded.stack, baseline)?;

        // Every present day gets a timestamp; downsampling may also keep
        // carried-forward values on days that had no grid.
        let mut days: BTreeMap<Timestamp, TimestampId> = BTreeMap::new();
        for (day, _) in loaded.stack.present() {
            days.insert(day, 0);
        }
        for sample in &samples {
            days.insert(sample.day, 0);
        }
        for (day, id) in days.iter_mut() {
            *id = writer.timestamp(*day)?;
        }
        writer.samples(&samples, |day| days.get(&day).copied())?;

        processed += loaded.stack.present_count();
        tracing::debug!(span = %span, kept = samples.len(), "Condensed span");
    }

    Ok((processed, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condense::{DownsamplePolicy, ExtremesPolicy, ThresholdPolicy};
    use crate::grid::{Baseline, SanityRange};
    use crate::pipeline::baseline::{BaselineLookup, FixedBaseline};
    use crate::pipeline::source::MemoryGridSource;
    use crate::store::{MemoryStore, RelationalStore};
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_ymd(y, m, d).unwrap()
    }

    /// 5x5 grid, ten days of 100 with a single 500 at (2,2) on day 7
    fn spike_source() -> MemoryGridSource {
        let mut source = MemoryGridSource::new(5, 5);
        for i in 0..10 {
            let mut grid = Grid::filled(5, 5, 100.0);
            if i == 6 {
                grid.set(2, 2, Some(500.0));
            }
            source.insert(day(2000, 1, 1 + i), grid).unwrap();
        }
        source
    }

    fn spike_baseline() -> Baseline {
        let mut mean = Grid::filled(5, 5, 100.0);
        mean.set(2, 2, Some(140.0));
        let mut sd = Grid::filled(5, 5, 0.0);
        sd.set(2, 2, Some(16_000f64.sqrt()));
        Baseline::new(mean, sd).unwrap()
    }

    fn settings(policy: Policy) -> CondenseSettings {
        CondenseSettings {
            start: day(2000, 1, 1),
            final_day: day(2000, 1, 10),
            increment: Increment::month(1).unwrap(),
            policy,
            clean: true,
        }
    }

    #[test]
    fn test_threshold_run_stores_single_spike() {
        let source = spike_source();
        let mut baselines = FixedBaseline::new(spike_baseline());
        let store = MemoryStore::new();
        let policy = Policy::Threshold(ThresholdPolicy::new(
            2.0,
            SanityRange::new(0.0, 1000.0),
            0,
        ));

        let report = run_condense(
            &source,
            &mut baselines,
            &LocationGrid::plain(5, 5),
            &store,
            &settings(policy),
        )
        .unwrap();

        assert_eq!(report.days_processed, 10);
        assert_eq!(report.timestamps_stored, 10);
        assert_eq!(report.samples_stored, 1);
        assert_eq!(report.stats.metadata.location_count, 25);
        assert_eq!(report.stats.metadata.rows, 5);

        store.connect_read_only().unwrap();
        let samples = store.samples_in_range(1, 10).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 500.0);
        assert_eq!(samples[0].timestamp_id, 7);
        let location = store.locations().unwrap()[samples[0].location_id as usize - 1];
        assert_eq!((location.row, location.col), (2, 2));
        assert_eq!(store.timestamps().unwrap()[6], day(2000, 1, 7));
    }

    #[test]
    fn test_missing_baseline_is_fatal() {
        let source = spike_source();
        let mut baselines = FixedBaseline::none().for_increment(Increment::month(1).unwrap());
        let store = MemoryStore::new();
        let policy = Policy::Threshold(ThresholdPolicy::default());

        let err = run_condense(
            &source,
            &mut baselines,
            &LocationGrid::plain(5, 5),
            &store,
            &settings(policy),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::BaselineUnavailable { day: d, .. } if d == day(2000, 1, 1)
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_pass_through_skips_missing_days() {
        let mut source = MemoryGridSource::new(2, 2);
        let mut grid = Grid::filled(2, 2, 7.0);
        grid.set(0, 1, None);
        source.insert(day(2000, 1, 2), grid).unwrap();
        source.insert(day(2000, 1, 5), Grid::filled(2, 2, 9.0)).unwrap();

        let store = MemoryStore::new();
        let report = run_condense(
            &source,
            &mut FixedBaseline::none(),
            &LocationGrid::plain(2, 2),
            &store,
            &settings(Policy::PassThrough {
                sanity: SanityRange::unbounded(),
            }),
        )
        .unwrap();

        assert_eq!(report.days_processed, 2);
        assert_eq!(report.days_missing, 8);
        assert_eq!(report.samples_stored, 3 + 4);
        assert!((report.stats.metadata.retained_percent() - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_extremes_span_run_on_relational_store() {
        let dir = tempdir().unwrap();
        let source = spike_source();
        let mut baselines = FixedBaseline::new(spike_baseline());
        let store = RelationalStore::new(dir.path().join("extremes.sqlite"));
        let policy = Policy::Extremes(ExtremesPolicy::new(2.0, SanityRange::new(0.0, 1000.0)));

        let report = run_condense(
            &source,
            &mut baselines,
            &LocationGrid::plain(5, 5),
            &store,
            &settings(policy),
        )
        .unwrap();

        assert_eq!(report.samples_stored, 1);
        assert_eq!(report.days_processed, 10);

        store.connect_read_only().unwrap();
        let hot = store
            .query_samples(&crate::query::parse_predicate("value > 400 AND row = 2").unwrap())
            .unwrap();
        assert_eq!(hot.len(), 1);
        let ts = store.timestamps().unwrap()[hot[0].timestamp_id as usize - 1];
        assert_eq!(ts, day(2000, 1, 7));
    }

    #[test]
    fn test_downsample_stores_timestamps_before_samples() {
        let mut source = MemoryGridSource::new(1, 1);
        for i in [1u32, 2, 5, 9, 10] {
            source
                .insert(day(2000, 1, i), Grid::filled(1, 1, i as f64))
                .unwrap();
        }
        let baseline = Baseline::new(Grid::filled(1, 1, 0.0), Grid::filled(1, 1, 1.0)).unwrap();
        let store = MemoryStore::new();
        let policy = Policy::Downsample(DownsamplePolicy::new(4, SanityRange::unbounded()));

        let report = run_condense(
            &source,
            &mut FixedBaseline::new(baseline),
            &LocationGrid::plain(1, 1),
            &store,
            &settings(policy),
        )
        .unwrap();

        assert_eq!(report.samples_stored, 4);
        store.connect_read_only().unwrap();
        let timestamps = store.timestamps().unwrap();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        for sample in store.samples_in_range(1, u32::MAX).unwrap() {
            assert!(sample.timestamp_id as usize <= timestamps.len());
        }
        let first = store.samples_in_range(1, 1).unwrap();
        assert_eq!(first[0].value, 1.0);
    }

    /// One baseline per increment of `lookup`, recording each request
    struct LookupBaselines {
        lookup: BaselineLookup,
        baseline: Baseline,
        requested: Vec<Increment>,
    }

    impl BaselineProvider for LookupBaselines {
        fn increment_for(&self, day: Timestamp) -> Increment {
            self.lookup.increment_for(day)
        }

        fn baseline_for(&mut self, day: Timestamp) -> EngineResult<Option<&Baseline>> {
            self.requested.push(self.lookup.increment_for(day));
            Ok(Some(&self.baseline))
        }
    }

    fn winter_source() -> MemoryGridSource {
        let mut source = MemoryGridSource::new(1, 1);
        for d in [day(2000, 12, 1), day(2001, 1, 15), day(2001, 2, 28)] {
            source.insert(d, Grid::filled(1, 1, 300.0)).unwrap();
        }
        source
    }

    fn winter_settings() -> CondenseSettings {
        CondenseSettings {
            start: day(2000, 12, 1),
            final_day: day(2001, 2, 28),
            increment: Increment::Djf,
            policy: Policy::Extremes(ExtremesPolicy::new(1.0, SanityRange::unbounded())),
            clean: true,
        }
    }

    #[test]
    fn test_span_crossing_monthly_baselines_is_rejected() {
        let source = winter_source();
        let mut baselines = LookupBaselines {
            lookup: BaselineLookup::Month,
            baseline: Baseline::new(Grid::filled(1, 1, 200.0), Grid::filled(1, 1, 10.0)).unwrap(),
            requested: Vec::new(),
        };
        let store = MemoryStore::new();

        let err = run_condense(
            &source,
            &mut baselines,
            &LocationGrid::plain(1, 1),
            &store,
            &winter_settings(),
        )
        .unwrap_err();

        match err {
            EngineError::SpanCrossesBaselines {
                first, day: d, other, ..
            } => {
                assert_eq!(first, Increment::month(12).unwrap());
                assert_eq!(other, Increment::month(1).unwrap());
                assert_eq!(d, day(2001, 1, 1));
            }
            other => panic!("expected SpanCrossesBaselines, got {:?}", other),
        }
        assert!(baselines.requested.is_empty());
        store.connect_read_only().unwrap();
        assert!(store.samples_in_range(1, u32::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_seasonal_baseline_covers_djf_span() {
        let source = winter_source();
        let mut baselines = LookupBaselines {
            lookup: BaselineLookup::Season,
            baseline: Baseline::new(Grid::filled(1, 1, 200.0), Grid::filled(1, 1, 10.0)).unwrap(),
            requested: Vec::new(),
        };
        let store = MemoryStore::new();

        let report = run_condense(
            &source,
            &mut baselines,
            &LocationGrid::plain(1, 1),
            &store,
            &winter_settings(),
        )
        .unwrap();

        assert_eq!(report.days_processed, 3);
        assert_eq!(baselines.requested, vec![Increment::Djf]);
    }

    #[test]
    fn test_location_grid_must_match_source() {
        let source = spike_source();
        let store = MemoryStore::new();
        let err = run_condense(
            &source,
            &mut FixedBaseline::none(),
            &LocationGrid::plain(4, 5),
            &store,
            &settings(Policy::PassThrough {
                sanity: SanityRange::unbounded(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::GridShape { .. }));
    }
}
