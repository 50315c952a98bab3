//! Day grid sources
//!
//! A source answers "the grid for day D", or `None` when that day has no
//! file. An absent day is never the same as a day of all-NODATA cells.

use crate::calendar::{TimeSpan, Timestamp};
use crate::error::{EngineError, EngineResult};
use crate::grid::{read_i16_grid, Grid, GridStack, SanityRange};
use crate::pipeline::Channel;
use std::collections::HashMap;
use std::path::PathBuf;

/// Supplier of daily grids for one channel
pub trait GridSource: Send + Sync {
    fn rows(&self) -> usize;

    fn cols(&self) -> usize;

    /// The grid for `day`, or `None` if the day is missing
    fn read_day(&self, day: Timestamp) -> EngineResult<Option<Grid>>;
}

/// Daily `i16` files located through a path template.
///
/// Placeholders: `{sensor}`, `{suffix1}`, `{suffix2}`, `{year}`,
/// `{month}` and `{day}` (zero-padded), `{doy}` (three digits).
#[derive(Debug, Clone)]
pub struct FlatGridSource {
    template: String,
    sensor: String,
    channel: Channel,
    rows: usize,
    cols: usize,
    nodata: f64,
}

impl FlatGridSource {
    pub fn new(
        template: &str,
        sensor: &str,
        channel: Channel,
        rows: usize,
        cols: usize,
        nodata: f64,
    ) -> Self {
        Self {
            template: template.to_string(),
            sensor: sensor.to_string(),
            channel,
            rows,
            cols,
            nodata,
        }
    }

    pub fn path_for(&self, day: Timestamp) -> PathBuf {
        let (year, month, dom) = day.ymd();
        let path = self
            .template
            .replace("{sensor}", &self.sensor)
            .replace("{suffix1}", &self.channel.suffix1)
            .replace("{suffix2}", &self.channel.suffix2)
            .replace("{year}", &format!("{:04}", year))
            .replace("{month}", &format!("{:02}", month))
            .replace("{day}", &format!("{:02}", dom))
            .replace("{doy}", &format!("{:03}", day.day_of_year()));
        PathBuf::from(path)
    }
}

impl GridSource for FlatGridSource {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn read_day(&self, day: Timestamp) -> EngineResult<Option<Grid>> {
        let path = self.path_for(day);
        if !path.exists() {
            return Ok(None);
        }
        read_i16_grid(&path, self.rows, self.cols, self.nodata).map(Some)
    }
}

/// Grids held in memory, keyed by day
#[derive(Debug, Clone, Default)]
pub struct MemoryGridSource {
    rows: usize,
    cols: usize,
    days: HashMap<Timestamp, Grid>,
}

impl MemoryGridSource {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            days: HashMap::new(),
        }
    }

    pub fn insert(&mut self, day: Timestamp, grid: Grid) -> EngineResult<()> {
        grid.ensure_shape(self.rows, self.cols)?;
        self.days.insert(day, grid);
        Ok(())
    }

    pub fn with_day(mut self, day: Timestamp, grid: Grid) -> EngineResult<Self> {
        self.insert(day, grid)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl GridSource for MemoryGridSource {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn read_day(&self, day: Timestamp) -> EngineResult<Option<Grid>> {
        Ok(self.days.get(&day).cloned())
    }
}

/// A span read from a source
#[derive(Debug, Clone)]
pub struct LoadedSpan {
    pub stack: GridStack,
    /// Days with no grid
    pub missing: usize,
    /// Values removed by the sanity filter
    pub filtered: usize,
}

/// Read every day of `span`, skipping missing days.
///
/// With a `filter`, values outside the range become absent before the
/// grid enters the stack.
pub fn load_stack(
    source: &dyn GridSource,
    span: TimeSpan,
    filter: Option<&SanityRange>,
) -> EngineResult<LoadedSpan> {
    let mut stack = GridStack::new(span);
    let mut missing = 0;
    let mut filtered = 0;

    for day in span.days() {
        match source.read_day(day)? {
            Some(mut grid) => {
                grid.ensure_shape(source.rows(), source.cols())?;
                if let Some(range) = filter {
                    filtered += grid.retain_range(range);
                }
                stack.insert(day, grid)?;
            }
            None => {
                missing += 1;
                tracing::warn!("{}, skipping", EngineError::MissingSourceDay { day });
            }
        }
    }

    tracing::debug!(
        span = %span,
        present = stack.present_count(),
        missing,
        filtered,
        "Loaded span"
    );

    Ok(LoadedSpan {
        stack,
        missing,
        filtered,
    })
}
