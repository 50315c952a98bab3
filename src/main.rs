//! Condense CLI
//!
//! Command-line interface for climatology and condensation runs:
//! - Build baselines for an increment over a range of years
//! - Condense daily grids into a store
//! - Query and inspect stores

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use condense::config::{generate_default_config, Config, LoggingConfig};
use condense::error::EngineResult;
use condense::grid::{read_f64_values, LocationGrid};
use condense::pipeline::{
    run_climatology, run_condense, run_workers, BaselineDirectory, Channel, ClimatologySettings,
    CondenseSettings, FlatGridSource, WorkerOutcome,
};
use condense::query::parse_predicate;
use condense::store::{open_store, BackendKind, GriddedStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "condense")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-cell climatologies and sparse anomaly archives for daily gridded records")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the baseline of the configured increment
    Climatology {
        /// Channels to process, e.g. 37v (default: all configured)
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },

    /// Condense daily grids into the configured store
    Condense {
        /// Channels to process, e.g. 37v (default: all configured)
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },

    /// Query a relational store, e.g. "value > 300 AND month = 2 LIMIT 10"
    Query {
        /// Predicate
        predicate: String,
        /// Channel whose store to read (default: first configured)
        #[arg(short = 'C', long)]
        channel: Option<String>,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show store counts and connection state
    Status {
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_default_config(output.as_deref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);
    config.validate()?;

    tracing::info!("Condense v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    match cli.command {
        Commands::Climatology { channels } => climatology(config, &channels).await,
        Commands::Condense { channels } => condense(config, &channels).await,
        Commands::Query {
            predicate,
            channel,
            format,
        } => query(&config, channel.as_deref(), &predicate, &format),
        Commands::Status { channels } => status(&config, &channels),
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("condense={}", logging.level)),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn write_default_config(output: Option<&Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Config written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn select_channels(config: &Config, wanted: &[String]) -> anyhow::Result<Vec<Channel>> {
    let configured = &config.sensor.channels;
    if wanted.is_empty() {
        return Ok(configured.clone());
    }
    wanted
        .iter()
        .map(|name| {
            configured
                .iter()
                .find(|c| c.to_string() == *name)
                .cloned()
                .with_context(|| format!("channel {} is not configured", name))
        })
        .collect()
}

fn grid_source(config: &Config, channel: &Channel) -> FlatGridSource {
    FlatGridSource::new(
        &config.sensor.data_path,
        &config.sensor.kind,
        channel.clone(),
        config.sensor.rows,
        config.sensor.cols,
        config.sensor.nodata,
    )
}

fn location_grid(config: &Config) -> EngineResult<LocationGrid> {
    let sensor = &config.sensor;
    match (&sensor.latitude_file, &sensor.longitude_file) {
        (Some(lat), Some(lon)) => {
            let count = sensor.rows * sensor.cols;
            let lats = read_f64_values(Path::new(lat), count)?;
            let lons = read_f64_values(Path::new(lon), count)?;
            LocationGrid::with_coordinates(sensor.rows, sensor.cols, &lats, &lons, sensor.nodata)
        }
        _ => Ok(LocationGrid::plain(sensor.rows, sensor.cols)),
    }
}

fn store_for(config: &Config, channel: &Channel) -> Box<dyn GriddedStore> {
    open_store(
        config.storage.backend,
        Path::new(&config.storage.path),
        &config.store_name(channel),
    )
}

/// Print each channel's outcome and fail if any channel failed
fn summarize<T>(
    config: &Config,
    outcomes: Vec<WorkerOutcome<T>>,
    describe: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    let mut failed = 0;
    for outcome in &outcomes {
        let tag = outcome.channel.tag(&config.sensor.kind);
        match &outcome.result {
            Ok(report) => println!("{}: {}", tag, describe(report)),
            Err(e) => {
                failed += 1;
                eprintln!("{}: FAILED: {}", tag, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} channels failed", failed, outcomes.len());
    }
    Ok(())
}

async fn climatology(config: Arc<Config>, wanted: &[String]) -> anyhow::Result<()> {
    let channels = select_channels(&config, wanted)?;
    let settings = ClimatologySettings {
        sensor: config.sensor.kind.clone(),
        start: config.start()?,
        final_day: config.final_day()?,
        increment: config.run.increment,
        filter: config.climatology_filter(),
        output_dir: PathBuf::from(&config.climatology.output_dir),
        nodata: config.sensor.nodata,
    };
    std::fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("creating {}", settings.output_dir.display()))?;

    let job_config = config.clone();
    let outcomes = run_workers(channels, config.workers.count(), move |channel| {
        let source = grid_source(&job_config, &channel);
        run_climatology(&source, &channel, &settings)
    })
    .await;

    summarize(&config, outcomes, |report| {
        format!(
            "{} spans, {} days read, {} missing, {} cells populated, mean at {}",
            report.spans,
            report.days_read,
            report.days_missing,
            report.populated_cells,
            report.files.mean.display()
        )
    })
}

async fn condense(config: Arc<Config>, wanted: &[String]) -> anyhow::Result<()> {
    let channels = select_channels(&config, wanted)?;
    let settings = CondenseSettings {
        start: config.start()?,
        final_day: config.final_day()?,
        increment: config.run.increment,
        policy: config.policy(),
        clean: config.storage.clean,
    };
    if config.storage.backend != BackendKind::Memory {
        std::fs::create_dir_all(&config.storage.path)
            .with_context(|| format!("creating {}", config.storage.path))?;
    }

    let job_config = config.clone();
    let outcomes = run_workers(channels, config.workers.count(), move |channel| {
        let config = &job_config;
        let source = grid_source(config, &channel);
        let locations = location_grid(config)?;
        let mut baselines = BaselineDirectory::new(
            config.baseline_dir(),
            &config.sensor.kind,
            channel.clone(),
            config.condense.lookup,
            config.sensor.rows,
            config.sensor.cols,
            config.sensor.nodata,
        );
        let store = store_for(config, &channel);
        run_condense(&source, &mut baselines, &locations, store.as_ref(), &settings)
    })
    .await;

    summarize(&config, outcomes, |report| {
        format!(
            "{} days, {} missing, {} samples kept ({:.4}% of pixels)",
            report.days_processed,
            report.days_missing,
            report.samples_stored,
            report.stats.metadata.retained_percent()
        )
    })
}

fn query(
    config: &Config,
    channel: Option<&str>,
    predicate: &str,
    format: &str,
) -> anyhow::Result<()> {
    let channel = match channel {
        Some(name) => select_channels(config, &[name.to_string()])?.remove(0),
        None => config
            .sensor
            .channels
            .first()
            .cloned()
            .context("no channels configured")?,
    };
    let predicate = parse_predicate(predicate)?;

    let store = store_for(config, &channel);
    store
        .connect_read_only()
        .with_context(|| format!("opening store for {}", channel.tag(&config.sensor.kind)))?;
    let samples = store.query_samples(&predicate)?;
    let locations = store.locations()?;
    let timestamps = store.timestamps()?;
    store.disconnect()?;

    let rows: Vec<_> = samples
        .iter()
        .filter_map(|s| {
            let location = locations.get((s.location_id as usize).checked_sub(1)?)?;
            let day = timestamps.get((s.timestamp_id as usize).checked_sub(1)?)?;
            Some((s, location, day))
        })
        .collect();

    match format {
        "json" => {
            let json: Vec<serde_json::Value> = rows
                .iter()
                .map(|(s, location, day)| {
                    serde_json::json!({
                        "id": s.id,
                        "value": s.value,
                        "row": location.row,
                        "col": location.col,
                        "lat": location.lat(),
                        "lon": location.lon(),
                        "day": day.to_string(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            println!(
                "{:>10}  {:>10}  {:>5}  {:>5}  {:>9}  {:>10}  {}",
                "id", "value", "row", "col", "lat", "lon", "day"
            );
            for (s, location, day) in &rows {
                let coord = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:.4}", v));
                println!(
                    "{:>10}  {:>10.2}  {:>5}  {:>5}  {:>9}  {:>10}  {}",
                    s.id,
                    s.value,
                    location.row,
                    location.col,
                    coord(location.lat()),
                    coord(location.lon()),
                    day
                );
            }
            println!("{} samples", rows.len());
        }
    }
    Ok(())
}

fn status(config: &Config, wanted: &[String]) -> anyhow::Result<()> {
    for channel in select_channels(config, wanted)? {
        let store = store_for(config, &channel);
        println!("{}", config.store_name(&channel));
        match store.connect_read_only().and_then(|_| store.stats()) {
            Ok(stats) => {
                println!("{}", stats);
                println!(
                    "  Retained: {:.4}% of pixels",
                    stats.metadata.retained_percent()
                );
                store.disconnect()?;
            }
            Err(e) => println!("  unavailable: {}", e),
        }
    }
    Ok(())
}
