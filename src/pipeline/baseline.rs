//! Baseline lookup for condensation runs

use crate::calendar::{Increment, Timestamp};
use crate::error::EngineResult;
use crate::grid::{find_baseline, read_baseline, Baseline};
use crate::pipeline::Channel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which baseline increment covers a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BaselineLookup {
    /// The day's calendar month (`JAN` .. `DEC`)
    #[default]
    Month,
    /// The day's season (`DJF`, `MAM`, `JJA`, `SON`)
    Season,
    /// One annual baseline (`YEAR`)
    Year,
}

impl BaselineLookup {
    pub fn increment_for(&self, day: Timestamp) -> Increment {
        match self {
            BaselineLookup::Month => Increment::month_of(day),
            BaselineLookup::Season => Increment::season_of(day),
            BaselineLookup::Year => Increment::Year,
        }
    }

    /// Whether every occurrence of `increment` falls under a single baseline
    pub fn covers(&self, increment: Increment) -> bool {
        match self {
            BaselineLookup::Month => matches!(increment, Increment::Day | Increment::Month(_)),
            BaselineLookup::Season => matches!(
                increment,
                Increment::Day
                    | Increment::Month(_)
                    | Increment::Djf
                    | Increment::Mam
                    | Increment::Jja
                    | Increment::Son
            ),
            BaselineLookup::Year => true,
        }
    }
}

/// Supplies the reference statistics for a day
pub trait BaselineProvider: Send {
    /// Increment whose baseline covers `day`
    fn increment_for(&self, day: Timestamp) -> Increment;

    /// The baseline covering `day`, if one exists
    fn baseline_for(&mut self, day: Timestamp) -> EngineResult<Option<&Baseline>>;
}

/// Baselines read from a directory of climatology artifacts.
///
/// The most recently loaded increment is cached, so walking days in order
/// reads each baseline pair once per increment change.
#[derive(Debug)]
pub struct BaselineDirectory {
    dir: PathBuf,
    sensor: String,
    channel: Channel,
    lookup: BaselineLookup,
    rows: usize,
    cols: usize,
    nodata: f64,
    cached: Option<(Increment, Option<Baseline>)>,
    loads: usize,
}

impl BaselineDirectory {
    pub fn new(
        dir: impl Into<PathBuf>,
        sensor: &str,
        channel: Channel,
        lookup: BaselineLookup,
        rows: usize,
        cols: usize,
        nodata: f64,
    ) -> Self {
        Self {
            dir: dir.into(),
            sensor: sensor.to_string(),
            channel,
            lookup,
            rows,
            cols,
            nodata,
            cached: None,
            loads: 0,
        }
    }

    /// Number of directory lookups performed so far
    pub fn loads(&self) -> usize {
        self.loads
    }

    fn load(&mut self, increment: Increment) -> EngineResult<Option<Baseline>> {
        self.loads += 1;
        let found = find_baseline(
            &self.dir,
            &self.sensor,
            &self.channel.suffix1,
            &self.channel.suffix2,
            increment,
        )?;
        match found {
            Some(files) => {
                tracing::info!(
                    increment = %increment,
                    mean = %files.mean.display(),
                    "Loaded baseline"
                );
                read_baseline(&files, self.rows, self.cols, self.nodata).map(Some)
            }
            None => {
                tracing::warn!(
                    increment = %increment,
                    dir = %self.dir.display(),
                    "No baseline found for {}",
                    self.channel.tag(&self.sensor)
                );
                Ok(None)
            }
        }
    }
}

impl BaselineProvider for BaselineDirectory {
    fn increment_for(&self, day: Timestamp) -> Increment {
        self.lookup.increment_for(day)
    }

    fn baseline_for(&mut self, day: Timestamp) -> EngineResult<Option<&Baseline>> {
        let increment = self.lookup.increment_for(day);
        let stale = !matches!(&self.cached, Some((cached, _)) if *cached == increment);
        if stale {
            let baseline = self.load(increment)?;
            self.cached = Some((increment, baseline));
        }
        Ok(self.cached.as_ref().and_then(|(_, b)| b.as_ref()))
    }
}

/// The same baseline (or none) for every day
#[derive(Debug, Clone, Default)]
pub struct FixedBaseline {
    baseline: Option<Baseline>,
    increment: Option<Increment>,
}

impl FixedBaseline {
    pub fn new(baseline: Baseline) -> Self {
        Self {
            baseline: Some(baseline),
            increment: None,
        }
    }

    /// A provider with no baseline, for the pass-through policy
    pub fn none() -> Self {
        Self::default()
    }

    /// Report `increment` in errors instead of `NONE`
    pub fn for_increment(mut self, increment: Increment) -> Self {
        self.increment = Some(increment);
        self
    }
}

impl BaselineProvider for FixedBaseline {
    fn increment_for(&self, _day: Timestamp) -> Increment {
        self.increment.unwrap_or(Increment::None)
    }

    fn baseline_for(&mut self, _day: Timestamp) -> EngineResult<Option<&Baseline>> {
        Ok(self.baseline.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{write_baseline, BaselineName, Grid};
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_ymd(y, m, d).unwrap()
    }

    fn write(dir: &std::path::Path, increment: Increment, mean: f64) {
        let name = BaselineName {
            sensor: "ssmi".to_string(),
            suffix1: "19".to_string(),
            suffix2: "h".to_string(),
            increment,
            first_year: 1990,
            last_year: 1999,
        };
        let baseline = Baseline::new(Grid::filled(2, 2, mean), Grid::filled(2, 2, 1.0)).unwrap();
        write_baseline(dir, &name, &baseline, -32768.0).unwrap();
    }

    #[test]
    fn test_lookup_increments() {
        let d = day(2001, 12, 15);
        assert_eq!(BaselineLookup::Month.increment_for(d).name(), "DEC");
        assert_eq!(BaselineLookup::Season.increment_for(d), Increment::Djf);
        assert_eq!(BaselineLookup::Year.increment_for(d), Increment::Year);
    }

    #[test]
    fn test_directory_caches_by_increment() {
        let dir = tempdir().unwrap();
        write(dir.path(), Increment::Djf, 150.0);
        write(dir.path(), Increment::Mam, 200.0);

        let mut provider = BaselineDirectory::new(
            dir.path(),
            "ssmi",
            Channel::new("19", "h"),
            BaselineLookup::Season,
            2,
            2,
            -32768.0,
        );

        let b = provider.baseline_for(day(2000, 1, 10)).unwrap().unwrap();
        assert_eq!(b.mean().get(0, 0), Some(150.0));
        provider.baseline_for(day(2000, 2, 28)).unwrap();
        provider.baseline_for(day(2000, 12, 1)).unwrap();
        assert_eq!(provider.loads(), 1);

        let b = provider.baseline_for(day(2000, 4, 1)).unwrap().unwrap();
        assert_eq!(b.mean().get(1, 1), Some(200.0));
        assert_eq!(provider.loads(), 2);

        assert!(provider.baseline_for(day(2000, 7, 1)).unwrap().is_none());
        assert!(provider.baseline_for(day(2000, 7, 2)).unwrap().is_none());
        assert_eq!(provider.loads(), 3);
    }

    #[test]
    fn test_fixed_baseline() {
        let mut none = FixedBaseline::none();
        assert!(none.baseline_for(day(2000, 1, 1)).unwrap().is_none());
        assert_eq!(none.increment_for(day(2000, 1, 1)), Increment::None);

        let baseline = Baseline::new(Grid::filled(1, 1, 0.0), Grid::filled(1, 1, 1.0)).unwrap();
        let mut fixed = FixedBaseline::new(baseline).for_increment(Increment::Year);
        assert!(fixed.baseline_for(day(1999, 5, 5)).unwrap().is_some());
        assert_eq!(fixed.increment_for(day(1999, 5, 5)), Increment::Year);
    }
}
