//! Climatology run: build a baseline for one increment over many years.
//!
//! Every occurrence of the increment between the start and final day is
//! read twice, once for the mean and once for the deviations, and both
//! passes must see the same data.

use crate::calendar::{Increment, TimeSpan, TimeSpanWalker, Timestamp};
use crate::error::{EngineError, EngineResult};
use crate::grid::{
    write_baseline, write_manifest, BaselineFiles, BaselineManifest, BaselineName, SanityRange,
};
use crate::pipeline::source::{load_stack, GridSource};
use crate::pipeline::Channel;
use crate::stats::{AccumulatedBaseline, StatisticsAccumulator};
use chrono::Utc;
use std::path::PathBuf;

/// Inputs of a climatology run
#[derive(Debug, Clone)]
pub struct ClimatologySettings {
    pub sensor: String,
    pub start: Timestamp,
    pub final_day: Timestamp,
    pub increment: Increment,
    /// Values outside this range are dropped before accumulation
    pub filter: Option<SanityRange>,
    pub output_dir: PathBuf,
    pub nodata: f64,
}

/// Outcome of a climatology run
#[derive(Debug, Clone)]
pub struct ClimatologyReport {
    pub channel: Channel,
    pub increment: Increment,
    pub spans: usize,
    pub days_read: usize,
    pub days_missing: usize,
    pub values_filtered: usize,
    pub populated_cells: usize,
    pub files: BaselineFiles,
    pub manifest: PathBuf,
}

/// Accumulate, then persist, the baseline of `settings.increment`
pub fn run_climatology(
    source: &dyn GridSource,
    channel: &Channel,
    settings: &ClimatologySettings,
) -> EngineResult<ClimatologyReport> {
    let spans: Vec<TimeSpan> =
        TimeSpanWalker::new(settings.start, settings.final_day, settings.increment)?.collect();
    let (first, last) = match (spans.first(), spans.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Err(EngineError::Config(format!(
                "no {} span between {} and {}",
                settings.increment, settings.start, settings.final_day
            )))
        }
    };

    tracing::info!(
        channel = %channel.tag(&settings.sensor),
        increment = %settings.increment,
        spans = spans.len(),
        "Starting climatology from {} to {}",
        first.start,
        last.end
    );

    let (accumulated, tally) = accumulate(source, &spans, settings.filter.as_ref())?;

    let name = BaselineName {
        sensor: settings.sensor.clone(),
        suffix1: channel.suffix1.clone(),
        suffix2: channel.suffix2.clone(),
        increment: settings.increment,
        first_year: first.start.year(),
        last_year: last.start.year(),
    };
    let files = write_baseline(
        &settings.output_dir,
        &name,
        &accumulated.baseline,
        settings.nodata,
    )?;
    let manifest = BaselineManifest {
        sensor: settings.sensor.clone(),
        channel: channel.to_string(),
        increment: settings.increment,
        first_year: name.first_year,
        last_year: name.last_year,
        rows: source.rows(),
        cols: source.cols(),
        nodata: settings.nodata,
        spans: spans.len(),
        days_read: tally.read,
        days_missing: tally.missing,
        created_at: Utc::now(),
    };
    let manifest = write_manifest(&settings.output_dir, &name, &manifest)?;

    let populated_cells = accumulated.population.populated_cells();
    if populated_cells == 0 {
        tracing::warn!(
            channel = %channel.tag(&settings.sensor),
            increment = %settings.increment,
            "Baseline has no populated cells"
        );
    }

    tracing::info!(
        days_read = tally.read,
        days_missing = tally.missing,
        populated_cells,
        "Finished climatology"
    );

    Ok(ClimatologyReport {
        channel: channel.clone(),
        increment: settings.increment,
        spans: spans.len(),
        days_read: tally.read,
        days_missing: tally.missing,
        values_filtered: tally.filtered,
        populated_cells,
        files,
        manifest,
    })
}

#[derive(Debug, Default)]
struct Tally {
    read: usize,
    missing: usize,
    filtered: usize,
}

/// Both statistics passes over every span
fn accumulate(
    source: &dyn GridSource,
    spans: &[TimeSpan],
    filter: Option<&SanityRange>,
) -> EngineResult<(AccumulatedBaseline, Tally)> {
    let mut tally = Tally::default();
    let mut means = StatisticsAccumulator::new(source.rows(), source.cols());
    for span in spans {
        let loaded = load_stack(source, *span, filter)?;
        tally.read += means.accumulate_stack(&loaded.stack)?;
        tally.missing += loaded.missing;
        tally.filtered += loaded.filtered;
    }

    let mut deviations = means.finish_mean()?;
    for span in spans {
        let loaded = load_stack(source, *span, filter)?;
        deviations.accumulate_stack(&loaded.stack)?;
    }

    Ok((deviations.finish()?, tally))
}
