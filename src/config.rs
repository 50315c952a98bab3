//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides. Values are
//! handed to the pipeline explicitly; nothing here is global.

use crate::calendar::{Increment, Timestamp};
use crate::condense::{DownsamplePolicy, ExtremesPolicy, Policy, PolicyKind, ThresholdPolicy};
use crate::grid::SanityRange;
use crate::pipeline::{default_worker_count, BaselineLookup, Channel};
use crate::store::BackendKind;
use chrono::Month;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub climatology: ClimatologyConfig,

    #[serde(default)]
    pub condense: CondenseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Date range and grouping of a run
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// First day, `YYYY-MM-DD`
    #[serde(default = "default_start")]
    pub start: String,

    /// Last day, `YYYY-MM-DD`
    #[serde(rename = "final", default = "default_final")]
    pub final_day: String,

    #[serde(default = "default_increment")]
    pub increment: Increment,
}

fn default_start() -> String {
    "2000-01-01".to_string()
}

fn default_final() -> String {
    "2000-12-31".to_string()
}

fn default_increment() -> Increment {
    Increment::Month(Month::January)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            final_day: default_final(),
            increment: default_increment(),
        }
    }
}

/// Sensor grid description
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_kind")]
    pub kind: String,

    #[serde(default = "default_hemisphere")]
    pub hemisphere: String,

    #[serde(default = "default_rows")]
    pub rows: usize,

    #[serde(default = "default_cols")]
    pub cols: usize,

    #[serde(default = "default_nodata")]
    pub nodata: f64,

    /// Daily grid path template, see `FlatGridSource`
    #[serde(default = "default_data_path")]
    pub data_path: String,

    /// Row-major f64 latitudes
    pub latitude_file: Option<String>,

    /// Row-major f64 longitudes
    pub longitude_file: Option<String>,

    /// Physically valid value range
    pub valid_min: Option<f64>,
    pub valid_max: Option<f64>,

    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
}

fn default_sensor_kind() -> String {
    "ssmi".to_string()
}

fn default_hemisphere() -> String {
    "north".to_string()
}

fn default_rows() -> usize {
    448
}

fn default_cols() -> usize {
    304
}

fn default_nodata() -> f64 {
    -32768.0
}

fn default_data_path() -> String {
    "./data/{sensor}/{year}/{sensor}{suffix1}{suffix2}_{year}{month}{day}.bin".to_string()
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::new("37", "h"), Channel::new("37", "v")]
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: default_sensor_kind(),
            hemisphere: default_hemisphere(),
            rows: default_rows(),
            cols: default_cols(),
            nodata: default_nodata(),
            data_path: default_data_path(),
            latitude_file: None,
            longitude_file: None,
            valid_min: None,
            valid_max: None,
            channels: default_channels(),
        }
    }
}

/// Baseline generation
#[derive(Debug, Clone, Deserialize)]
pub struct ClimatologyConfig {
    #[serde(default = "default_baseline_dir")]
    pub output_dir: String,

    /// Drop values outside the sensor's valid range before accumulating
    #[serde(default = "default_filter")]
    pub filter: bool,
}

fn default_baseline_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("condense").join("baselines").to_string_lossy().to_string())
        .unwrap_or_else(|| "./condense_data/baselines".to_string())
}

fn default_filter() -> bool {
    true
}

impl Default for ClimatologyConfig {
    fn default() -> Self {
        Self {
            output_dir: default_baseline_dir(),
            filter: default_filter(),
        }
    }
}

/// Condensation policy and baseline lookup
#[derive(Debug, Clone, Deserialize)]
pub struct CondenseConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    #[serde(default = "default_k")]
    pub k: f64,

    #[serde(default = "default_min_adjacent")]
    pub min_adjacent: usize,

    /// LTTB points per cell and span
    #[serde(default = "default_target")]
    pub target: usize,

    #[serde(default)]
    pub lookup: BaselineLookup,

    /// Defaults to `climatology.output_dir`
    pub baseline_dir: Option<String>,
}

fn default_k() -> f64 {
    2.0
}

fn default_min_adjacent() -> usize {
    2
}

fn default_target() -> usize {
    10
}

impl Default for CondenseConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            k: default_k(),
            min_adjacent: default_min_adjacent(),
            target: default_target(),
            lookup: BaselineLookup::default(),
            baseline_dir: None,
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_store_path")]
    pub path: String,

    /// Store name template: `{sensor}`, `{channel}`, `{hemisphere}`, `{policy}`
    #[serde(default = "default_store_name")]
    pub name: String,

    /// Drop existing tables before writing
    #[serde(default)]
    pub clean: bool,
}

fn default_store_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("condense").join("stores").to_string_lossy().to_string())
        .unwrap_or_else(|| "./condense_data/stores".to_string())
}

fn default_store_name() -> String {
    "{sensor}{channel}_{hemisphere}_{policy}".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_store_path(),
            name: default_store_name(),
            clean: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Channel fan-out
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkersConfig {
    /// Concurrent channels; defaults to the available parallelism
    pub max: Option<usize>,
}

impl WorkersConfig {
    pub fn count(&self) -> usize {
        self.max.unwrap_or_else(default_worker_count).max(1)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("condense").join("config.toml")),
            Some(PathBuf::from("/etc/condense/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("CONDENSE_DATA_DIR") {
            self.climatology.output_dir = data_dir;
        }

        // Storage overrides
        if let Ok(path) = std::env::var("CONDENSE_STORE_PATH") {
            self.storage.path = path;
        }
        if let Ok(backend) = std::env::var("CONDENSE_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.storage.backend = kind,
                Err(e) => tracing::warn!("Ignoring CONDENSE_BACKEND: {}", e),
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("CONDENSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CONDENSE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings no run could use
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (start, final_day) = (self.start()?, self.final_day()?);
        if start > final_day {
            return Err(ConfigError::Invalid(format!(
                "run.start {} is after run.final {}",
                start, final_day
            )));
        }
        if self.sensor.rows == 0 || self.sensor.cols == 0 {
            return Err(ConfigError::Invalid(format!(
                "sensor grid {}x{} is empty",
                self.sensor.rows, self.sensor.cols
            )));
        }
        if self.sensor.channels.is_empty() {
            return Err(ConfigError::Invalid("sensor.channels is empty".to_string()));
        }
        let range = self.sanity_range();
        if range.min > range.max {
            return Err(ConfigError::Invalid(format!(
                "sensor.valid_min {} exceeds sensor.valid_max {}",
                range.min, range.max
            )));
        }
        if !(self.condense.k.is_finite() && self.condense.k >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "condense.k must be a non-negative number, got {}",
                self.condense.k
            )));
        }
        if self.condense.min_adjacent > 8 {
            return Err(ConfigError::Invalid(format!(
                "condense.min_adjacent {} exceeds the 8 neighbours of a cell",
                self.condense.min_adjacent
            )));
        }
        if !self.policy().is_per_day() && !self.condense.lookup.covers(self.run.increment) {
            return Err(ConfigError::Invalid(format!(
                "condense.policy {} needs one baseline per span, but run.increment {} crosses {:?} baselines",
                self.condense.policy, self.run.increment, self.condense.lookup
            )));
        }
        match (&self.sensor.latitude_file, &self.sensor.longitude_file) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::Invalid(
                "sensor.latitude_file and sensor.longitude_file must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn start(&self) -> Result<Timestamp, ConfigError> {
        parse_day("run.start", &self.run.start)
    }

    pub fn final_day(&self) -> Result<Timestamp, ConfigError> {
        parse_day("run.final", &self.run.final_day)
    }

    /// The sensor's valid range; unbounded on any side left unset
    pub fn sanity_range(&self) -> SanityRange {
        SanityRange::new(
            self.sensor.valid_min.unwrap_or(f64::NEG_INFINITY),
            self.sensor.valid_max.unwrap_or(f64::INFINITY),
        )
    }

    /// Range applied before accumulation, if filtering is on
    pub fn climatology_filter(&self) -> Option<SanityRange> {
        self.climatology.filter.then(|| self.sanity_range())
    }

    pub fn policy(&self) -> Policy {
        let sanity = self.sanity_range();
        let c = &self.condense;
        match c.policy {
            PolicyKind::None => Policy::PassThrough { sanity },
            PolicyKind::Threshold => {
                Policy::Threshold(ThresholdPolicy::new(c.k, sanity, c.min_adjacent))
            }
            PolicyKind::Extremes => Policy::Extremes(ExtremesPolicy::new(c.k, sanity)),
            PolicyKind::Downsample => Policy::Downsample(DownsamplePolicy::new(c.target, sanity)),
        }
    }

    pub fn baseline_dir(&self) -> PathBuf {
        PathBuf::from(
            self.condense
                .baseline_dir
                .as_deref()
                .unwrap_or(&self.climatology.output_dir),
        )
    }

    /// Store name for one channel
    pub fn store_name(&self, channel: &Channel) -> String {
        self.storage
            .name
            .replace("{sensor}", &self.sensor.kind)
            .replace("{channel}", &channel.to_string())
            .replace("{hemisphere}", &self.sensor.hemisphere)
            .replace("{policy}", &self.condense.policy.to_string())
    }
}

fn parse_day(key: &str, value: &str) -> Result<Timestamp, ConfigError> {
    value
        .parse::<Timestamp>()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a YYYY-MM-DD date: {:?}", key, value)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            sensor: SensorConfig::default(),
            climatology: ClimatologyConfig::default(),
            condense: CondenseConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            workers: WorkersConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Condense Configuration
#
# Environment variables override these settings:
# - CONDENSE_DATA_DIR      (climatology.output_dir)
# - CONDENSE_STORE_PATH    (storage.path)
# - CONDENSE_BACKEND       (storage.backend)
# - CONDENSE_LOG_LEVEL
# - CONDENSE_LOG_FORMAT

[run]
# Inclusive date range
start = "2000-01-01"
final = "2000-12-31"

# Climatology grouping: JAN..DEC, DJF, MAM, JJA, SON, YEAR, WEEK, DAY, NONE
increment = "JAN"

[sensor]
kind = "ssmi"
hemisphere = "north"
rows = 448
cols = 304

# Raw value marking an absent measurement
nodata = -32768

# Daily grid files; placeholders {sensor} {suffix1} {suffix2} {year} {month} {day} {doy}
data_path = "./data/{sensor}/{year}/{sensor}{suffix1}{suffix2}_{year}{month}{day}.bin"

# Optional row-major f64 coordinate grids
# latitude_file = "./data/ssmi/lat.bin"
# longitude_file = "./data/ssmi/lon.bin"

# Physically valid range (unset means unbounded)
valid_min = 50
valid_max = 350

[[sensor.channels]]
suffix1 = "37"
suffix2 = "h"

[[sensor.channels]]
suffix1 = "37"
suffix2 = "v"

[climatology]
# Where baseline files and manifests are written
output_dir = "./condense_data/baselines"

# Drop values outside the valid range before accumulating
filter = true

[condense]
# Policy: none, threshold, extremes, downsample
policy = "threshold"

# Band half-width in standard deviations
k = 2.0

# Candidate neighbours needed to keep a candidate (threshold)
min_adjacent = 2

# Points kept per cell and span (downsample)
target = 10

# Baseline covering each day: month, season, year
lookup = "month"

# Defaults to climatology.output_dir
# baseline_dir = "./condense_data/baselines"

[storage]
# Backend: memory, flat, relational
backend = "relational"
path = "./condense_data/stores"

# Placeholders {sensor} {channel} {hemisphere} {policy}
name = "{sensor}{channel}_{hemisphere}_{policy}"

# Drop existing tables before writing
clean = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

[workers]
# Channels processed concurrently (defaults to available parallelism)
# max = 4
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run.increment, Increment::Month(Month::January));
        assert_eq!(config.sensor.channels.len(), 2);
        assert_eq!(config.storage.backend, BackendKind::Relational);
        assert_eq!(config.condense.policy, PolicyKind::Threshold);
        assert_eq!(config.sanity_range(), SanityRange::new(50.0, 350.0));
        assert_eq!(
            config.store_name(&config.sensor.channels[1]),
            "ssmi37v_north_threshold"
        );
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config: Config = toml::from_str("[sensor]\nrows = 10\ncols = 12\n").unwrap();
        assert_eq!(config.sensor.rows, 10);
        assert_eq!(config.sensor.nodata, -32768.0);
        assert_eq!(config.condense.k, 2.0);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.climatology_filter().is_some());
        assert_eq!(config.baseline_dir(), PathBuf::from(&config.climatology.output_dir));
    }

    #[test]
    fn test_policy_from_config() {
        let toml = r#"
            [sensor]
            valid_min = 0
            valid_max = 1000
            [condense]
            policy = "downsample"
            target = 6
            lookup = "season"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.policy(),
            Policy::Downsample(DownsamplePolicy::new(6, SanityRange::new(0.0, 1000.0)))
        );
        assert_eq!(config.condense.lookup, BaselineLookup::Season);

        let config: Config = toml::from_str("[condense]\npolicy = \"none\"\n").unwrap();
        assert!(!config.policy().requires_baseline());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.run.start = "2001-01-01".to_string();
        config.run.final_day = "2000-01-01".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.run.start = "01/02/2000".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.condense.min_adjacent = 9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.latitude_file = Some("lat.bin".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_span_policy_against_lookup() {
        let mut config = Config::default();
        config.condense.policy = PolicyKind::Extremes;
        config.run.increment = Increment::Djf;
        config.condense.lookup = BaselineLookup::Month;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.condense.lookup = BaselineLookup::Season;
        assert!(config.validate().is_ok());

        config.run.increment = Increment::Year;
        assert!(config.validate().is_err());
        config.condense.lookup = BaselineLookup::Year;
        assert!(config.validate().is_ok());

        // per-day policies look the baseline up day by day
        config.condense.policy = PolicyKind::Threshold;
        config.condense.lookup = BaselineLookup::Month;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[run\nstart = ").unwrap();
        match Config::load(&bad) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();

        std::env::set_var("CONDENSE_BACKEND", "flat");
        std::env::set_var("CONDENSE_STORE_PATH", "/tmp/condense-stores");
        let config = Config::load_with_env(&path).unwrap();
        std::env::remove_var("CONDENSE_BACKEND");
        std::env::remove_var("CONDENSE_STORE_PATH");

        assert_eq!(config.storage.backend, BackendKind::Flat);
        assert_eq!(config.storage.path, "/tmp/condense-stores");
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(WorkersConfig { max: Some(0) }.count(), 1);
        assert_eq!(WorkersConfig { max: Some(3) }.count(), 3);
        assert!(WorkersConfig::default().count() >= 1);
    }
}
