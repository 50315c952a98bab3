//! Flat row-major grid files and baseline artifacts
//!
//! Layout of every grid file: `rows * cols` little-endian values, row-major,
//! no header. Day grids use `i16`; baselines and coordinates use `f64`.
//! Absent cells are written as the NODATA sentinel.
//!
//! Baseline artifacts are named
//! `climate-{sensor}{suffix1}{suffix2}-{mean|sd}-{increment}-{firstYear}-{lastYear}.bin`
//! with a JSON manifest beside them.

use crate::calendar::Increment;
use crate::error::{EngineError, EngineResult};
use crate::grid::baseline::Baseline;
use crate::grid::types::Grid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Prefix shared by all baseline artifacts
const BASELINE_PREFIX: &str = "climate";

fn read_exact_values<const N: usize>(path: &Path, count: usize) -> EngineResult<Vec<[u8; N]>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = Vec::with_capacity(count * N);
    reader.read_to_end(&mut bytes)?;

    if bytes.len() != count * N {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{}: expected {} bytes, found {}",
                path.display(),
                count * N,
                bytes.len()
            ),
        )));
    }

    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            buf
        })
        .collect())
}

fn create_parent(path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Read a day grid of little-endian `i16` samples
pub fn read_i16_grid(path: &Path, rows: usize, cols: usize, nodata: f64) -> EngineResult<Grid> {
    let raw: Vec<f64> = read_exact_values::<2>(path, rows * cols)?
        .into_iter()
        .map(|b| i16::from_le_bytes(b) as f64)
        .collect();
    Grid::from_raw(rows, cols, &raw, nodata)
}

/// Write a day grid as little-endian `i16`, rounding values
pub fn write_i16_grid(path: &Path, grid: &Grid, nodata: f64) -> EngineResult<()> {
    create_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    for value in grid.to_raw(nodata) {
        let v = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a grid of little-endian `f64` values
pub fn read_f64_grid(path: &Path, rows: usize, cols: usize, nodata: f64) -> EngineResult<Grid> {
    let raw: Vec<f64> = read_f64_values(path, rows * cols)?;
    Grid::from_raw(rows, cols, &raw, nodata)
}

/// Raw little-endian `f64` values, for coordinate files
pub fn read_f64_values(path: &Path, count: usize) -> EngineResult<Vec<f64>> {
    Ok(read_exact_values::<8>(path, count)?
        .into_iter()
        .map(f64::from_le_bytes)
        .collect())
}

/// Write a grid as little-endian `f64`
pub fn write_f64_grid(path: &Path, grid: &Grid, nodata: f64) -> EngineResult<()> {
    create_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    for value in grid.to_raw(nodata) {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Which half of a baseline a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Mean,
    Sd,
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatKind::Mean => f.write_str("mean"),
            StatKind::Sd => f.write_str("sd"),
        }
    }
}

/// Deterministic naming of baseline artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineName {
    pub sensor: String,
    pub suffix1: String,
    pub suffix2: String,
    pub increment: Increment,
    pub first_year: i32,
    pub last_year: i32,
}

impl BaselineName {
    fn channel_tag(sensor: &str, suffix1: &str, suffix2: &str) -> String {
        format!("{}{}{}", sensor, suffix1, suffix2)
    }

    /// Name prefix shared by every year range of one statistic
    pub fn search_prefix(
        sensor: &str,
        suffix1: &str,
        suffix2: &str,
        kind: StatKind,
        increment: Increment,
    ) -> String {
        format!(
            "{}-{}-{}-{}-",
            BASELINE_PREFIX,
            Self::channel_tag(sensor, suffix1, suffix2),
            kind,
            increment
        )
    }

    pub fn file_name(&self, kind: StatKind) -> String {
        format!(
            "{}{}-{}.bin",
            Self::search_prefix(&self.sensor, &self.suffix1, &self.suffix2, kind, self.increment),
            self.first_year,
            self.last_year
        )
    }

    pub fn manifest_name(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}.json",
            BASELINE_PREFIX,
            Self::channel_tag(&self.sensor, &self.suffix1, &self.suffix2),
            self.increment,
            self.first_year,
            self.last_year
        )
    }
}

/// Descriptive sidecar written next to a baseline pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineManifest {
    pub sensor: String,
    pub channel: String,
    pub increment: Increment,
    pub first_year: i32,
    pub last_year: i32,
    pub rows: usize,
    pub cols: usize,
    pub nodata: f64,
    pub spans: usize,
    pub days_read: usize,
    pub days_missing: usize,
    pub created_at: DateTime<Utc>,
}

/// Paths of a persisted baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineFiles {
    pub mean: PathBuf,
    pub sd: PathBuf,
}

/// Write the mean and sd grids into `dir`
pub fn write_baseline(
    dir: &Path,
    name: &BaselineName,
    baseline: &Baseline,
    nodata: f64,
) -> EngineResult<BaselineFiles> {
    std::fs::create_dir_all(dir)?;
    let files = BaselineFiles {
        mean: dir.join(name.file_name(StatKind::Mean)),
        sd: dir.join(name.file_name(StatKind::Sd)),
    };
    write_f64_grid(&files.mean, baseline.mean(), nodata)?;
    write_f64_grid(&files.sd, baseline.sd(), nodata)?;
    tracing::info!("Wrote baseline {:?} and {:?}", files.mean, files.sd);
    Ok(files)
}

pub fn write_manifest(dir: &Path, name: &BaselineName, manifest: &BaselineManifest) -> EngineResult<PathBuf> {
    let path = dir.join(name.manifest_name());
    create_parent(&path)?;
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

pub fn read_baseline(
    files: &BaselineFiles,
    rows: usize,
    cols: usize,
    nodata: f64,
) -> EngineResult<Baseline> {
    let mean = read_f64_grid(&files.mean, rows, cols, nodata)?;
    let sd = read_f64_grid(&files.sd, rows, cols, nodata)?;
    Baseline::new(mean, sd)
}

/// Locate the baseline pair for a channel and increment in `dir`.
///
/// When several year ranges exist the lexicographically last is chosen.
pub fn find_baseline(
    dir: &Path,
    sensor: &str,
    suffix1: &str,
    suffix2: &str,
    increment: Increment,
) -> EngineResult<Option<BaselineFiles>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mean_prefix = BaselineName::search_prefix(sensor, suffix1, suffix2, StatKind::Mean, increment);
    let sd_prefix = BaselineName::search_prefix(sensor, suffix1, suffix2, StatKind::Sd, increment);

    let mut candidates: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(&mean_prefix) && name.ends_with(".bin"))
        .collect();
    candidates.sort();

    let Some(mean_name) = candidates.pop() else {
        return Ok(None);
    };
    let years = &mean_name[mean_prefix.len()..];
    let sd = dir.join(format!("{}{}", sd_prefix, years));
    if !sd.exists() {
        tracing::warn!("Baseline {} has no matching sd file", mean_name);
        return Ok(None);
    }

    Ok(Some(BaselineFiles {
        mean: dir.join(mean_name),
        sd,
    }))
}
