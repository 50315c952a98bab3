//! Gridded sample stores
//!
//! Condensed samples are persisted as a small star schema:
//!
//! ```text
//!   METADATA (rows, cols, timestamp_count, location_count, sample_count)
//!
//!   LOCATIONS (id, row, col, lat, lon) ◀──┐
//!                                         │ location_id
//!   SAMPLES (id, value, location_id, timestamp_id)
//!                                         │ timestamp_id
//!   TIMESTAMPS (id, day_index, year, ◀────┘
//!               month, day, day_of_year)
//! ```
//!
//! Three backends implement [`GriddedStore`]:
//!
//! - **memory**: volatile tables, for tests and short QA runs
//! - **flat**: append-only fixed-width record files, for batch jobs
//! - **relational**: SQLite, with ad-hoc [`Predicate`] queries
//!
//! Ids are dense and 1-based in insertion order. Every backend checks that a
//! sample's location and timestamp ids exist before accepting it, and
//! rebuilds its counts from the tables on connect.

pub mod error;
pub mod flat;
pub mod memory;
pub mod relational;

pub use error::{StoreError, StoreResult};
pub use flat::FlatStore;
pub use memory::MemoryStore;
pub use relational::RelationalStore;

use crate::calendar::Timestamp;
use crate::grid::Location;
use crate::query::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub type LocationId = u32;
pub type TimestampId = u32;
pub type SampleId = u64;

/// Store backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Flat,
    #[default]
    Relational,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Flat => "flat",
            BackendKind::Relational => "relational",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "ram" => Ok(BackendKind::Memory),
            "flat" | "file" => Ok(BackendKind::Flat),
            "relational" | "sqlite" | "sql" => Ok(BackendKind::Relational),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    ReadOnly,
}

impl ConnectionStatus {
    pub fn can_read(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }

    /// Fail unless the connection accepts writes
    pub fn check_writable(&self) -> StoreResult<()> {
        match self {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::ReadOnly => Err(StoreError::ReadOnly),
            ConnectionStatus::Disconnected => Err(StoreError::NotConnected),
        }
    }

    pub fn check_readable(&self) -> StoreResult<()> {
        if self.can_read() {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::ReadOnly => "read-only",
        };
        f.write_str(s)
    }
}

/// The single METADATA row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub rows: u32,
    pub cols: u32,
    pub timestamp_count: u32,
    pub location_count: u32,
    pub sample_count: u64,
}

impl Metadata {
    /// Metadata for a grid extent; counts are filled in by the store
    pub fn for_grid(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            ..Self::default()
        }
    }

    /// Share of all stored cell-days that were kept as samples
    pub fn retained_percent(&self) -> f64 {
        let total = self.timestamp_count as f64 * self.rows as f64 * self.cols as f64;
        if total == 0.0 {
            0.0
        } else {
            self.sample_count as f64 / total * 100.0
        }
    }
}

/// One persisted fact row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub value: f64,
    pub location_id: LocationId,
    pub timestamp_id: TimestampId,
}

/// Row counts a backend keeps for id assignment and metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Counts {
    pub locations: u32,
    pub timestamps: u32,
    pub samples: u64,
}

impl Counts {
    /// Reject dangling ids and values that cannot be persisted
    pub fn check_sample(
        &self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<()> {
        if !value.is_finite() {
            return Err(StoreError::InvalidSample(format!(
                "non-finite value {}",
                value
            )));
        }
        if location == 0 || location > self.locations {
            return Err(StoreError::InvalidReference {
                table: "locations",
                id: location as u64,
            });
        }
        if timestamp == 0 || timestamp > self.timestamps {
            return Err(StoreError::InvalidReference {
                table: "timestamps",
                id: timestamp as u64,
            });
        }
        Ok(())
    }

    /// Check a whole batch before any of it is written
    pub fn check_batch(&self, samples: &[(f64, LocationId, TimestampId)]) -> StoreResult<()> {
        samples
            .iter()
            .try_for_each(|&(value, location, timestamp)| self.check_sample(value, location, timestamp))
    }

    pub fn metadata(&self, rows: u32, cols: u32) -> Metadata {
        Metadata {
            rows,
            cols,
            timestamp_count: self.timestamps,
            location_count: self.locations,
            sample_count: self.samples,
        }
    }

    /// Log where persisted metadata disagrees with the tables
    pub fn reconcile(&self, backend: BackendKind, stored: &Metadata) {
        if stored.location_count != self.locations
            || stored.timestamp_count != self.timestamps
            || stored.sample_count != self.samples
        {
            tracing::warn!(
                backend = %backend,
                stored_locations = stored.location_count,
                stored_timestamps = stored.timestamp_count,
                stored_samples = stored.sample_count,
                locations = self.locations,
                timestamps = self.timestamps,
                samples = self.samples,
                "Metadata counts differ from table contents, using table counts"
            );
        }
    }
}

/// Status report for a store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreStats {
    pub backend: BackendKind,
    pub status: ConnectionStatus,
    pub metadata: Metadata,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Backend: {} ({})", self.backend, self.status)?;
        writeln!(f, "  Grid: {} x {}", self.metadata.rows, self.metadata.cols)?;
        writeln!(f, "  Locations: {}", self.metadata.location_count)?;
        writeln!(f, "  Timestamps: {}", self.metadata.timestamp_count)?;
        writeln!(f, "  Samples: {}", self.metadata.sample_count)?;
        write!(f, "  Retained: {:.4}%", self.metadata.retained_percent())
    }
}

/// Persistence interface shared by every backend.
///
/// Methods take `&self`; backends serialize access internally so one
/// connection may be shared between threads.
pub trait GriddedStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn status(&self) -> ConnectionStatus;

    /// Open for reading and writing, creating tables as needed
    fn connect(&self) -> StoreResult<()>;

    fn connect_read_only(&self) -> StoreResult<()>;

    /// Flush pending writes and close
    fn disconnect(&self) -> StoreResult<()>;

    /// Drop and recreate every table
    fn clean(&self) -> StoreResult<()>;

    /// Append a location. Repeated calls append duplicate rows.
    fn store_location(&self, location: &Location) -> StoreResult<LocationId>;

    fn store_timestamp(&self, timestamp: Timestamp) -> StoreResult<TimestampId>;

    fn store_sample(
        &self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId>;

    /// Append many samples; ids are returned in input order
    fn store_samples(
        &self,
        samples: &[(f64, LocationId, TimestampId)],
    ) -> StoreResult<Vec<SampleId>> {
        samples
            .iter()
            .map(|&(value, location, timestamp)| self.store_sample(value, location, timestamp))
            .collect()
    }

    /// Record the grid extent. Counts always come from the store itself and
    /// an existing row is updated in place.
    fn store_metadata(&self, metadata: &Metadata) -> StoreResult<()>;

    fn metadata(&self) -> StoreResult<Metadata>;

    /// All locations in id order
    fn locations(&self) -> StoreResult<Vec<Location>>;

    /// All timestamps in id order
    fn timestamps(&self) -> StoreResult<Vec<Timestamp>>;

    fn samples_at_timestamp(&self, timestamp: TimestampId) -> StoreResult<Vec<Sample>>;

    /// Samples whose timestamp id lies in `first..=last`, in id order
    fn samples_in_range(&self, first: TimestampId, last: TimestampId)
        -> StoreResult<Vec<Sample>>;

    /// Ad-hoc filtering; only backends with a query planner support it
    fn query_samples(&self, _predicate: &Predicate) -> StoreResult<Vec<Sample>> {
        Err(StoreError::Unsupported {
            backend: self.kind(),
            operation: "query_samples",
        })
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            backend: self.kind(),
            status: self.status(),
            metadata: self.metadata()?,
        })
    }
}

/// Construct an unconnected store of the given kind.
///
/// `name` prefixes the flat backend's table files and names the SQLite
/// database file; the memory backend ignores both arguments.
pub fn open_store(kind: BackendKind, dir: &Path, name: &str) -> Box<dyn GriddedStore> {
    match kind {
        BackendKind::Memory => Box::new(MemoryStore::new()),
        BackendKind::Flat => Box::new(FlatStore::new(dir, name)),
        BackendKind::Relational => {
            Box::new(RelationalStore::new(dir.join(format!("{}.sqlite", name))))
        }
    }
}

/// Shared behaviour checks every backend must pass
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;

    pub fn locations() -> Vec<Location> {
        vec![
            Location::new(0, 0).with_coords(70.5, -45.25),
            Location::new(0, 1).with_coords(70.5, -44.75),
            Location::new(0, 2),
            Location::new(1, 0).with_coords(71.0, -45.25),
            Location::new(1, 1),
            Location::new(1, 2).with_coords(-71.0, 179.5),
        ]
    }

    pub fn timestamps() -> Vec<Timestamp> {
        vec![
            Timestamp::from_ymd(2000, 2, 28).unwrap(),
            Timestamp::from_ymd(2000, 2, 29).unwrap(),
            Timestamp::from_ymd(2000, 3, 1).unwrap(),
        ]
    }

    /// (value, location id, timestamp id)
    pub fn samples() -> Vec<(f64, LocationId, TimestampId)> {
        vec![
            (250.5, 1, 1),
            (-3.25, 6, 1),
            (301.0, 2, 2),
            (302.0, 3, 2),
            (303.0, 4, 2),
            (120.0, 5, 3),
            (0.0, 1, 3),
        ]
    }

    /// Populate a freshly connected, clean store
    pub fn populate(store: &dyn GriddedStore) {
        for (i, loc) in locations().iter().enumerate() {
            assert_eq!(store.store_location(loc).unwrap(), i as u32 + 1);
        }
        for (i, ts) in timestamps().into_iter().enumerate() {
            assert_eq!(store.store_timestamp(ts).unwrap(), i as u32 + 1);
        }
        let all = samples();
        let (single, batch) = all.split_at(2);
        for (i, &(v, l, t)) in single.iter().enumerate() {
            assert_eq!(store.store_sample(v, l, t).unwrap(), i as u64 + 1);
        }
        assert_eq!(store.store_samples(batch).unwrap(), vec![3, 4, 5, 6, 7]);
        store.store_metadata(&Metadata::for_grid(2, 3)).unwrap();
    }

    /// Check the logical answers for the data written by [`populate`]
    pub fn verify(store: &dyn GriddedStore) {
        assert_eq!(store.locations().unwrap(), locations());
        assert_eq!(store.timestamps().unwrap(), timestamps());

        let meta = store.metadata().unwrap();
        assert_eq!(
            meta,
            Metadata {
                rows: 2,
                cols: 3,
                timestamp_count: 3,
                location_count: 6,
                sample_count: 7,
            }
        );

        let at_two = store.samples_at_timestamp(2).unwrap();
        assert_eq!(at_two.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(
            at_two[0],
            Sample {
                id: 3,
                value: 301.0,
                location_id: 2,
                timestamp_id: 2,
            }
        );
        assert!(store.samples_at_timestamp(9).unwrap().is_empty());

        let range = store.samples_in_range(2, 3).unwrap();
        assert_eq!(range.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
        let first = store.samples_in_range(1, 1).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].value, -3.25);
        assert!(store.samples_in_range(3, 2).unwrap().is_empty());
    }

    /// Full lifecycle: rejects, round trip, metadata upsert, read-only, clean
    pub fn exercise(store: &dyn GriddedStore) {
        assert_eq!(store.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            store.store_location(&Location::new(0, 0)),
            Err(StoreError::NotConnected)
        ));

        store.connect().unwrap();
        store.clean().unwrap();
        assert_eq!(store.status(), ConnectionStatus::Connected);
        assert_eq!(store.metadata().unwrap(), Metadata::default());

        assert!(matches!(
            store.store_sample(1.0, 1, 1),
            Err(StoreError::InvalidReference { table: "locations", .. })
        ));

        populate(store);

        assert!(matches!(
            store.store_sample(1.0, 7, 1),
            Err(StoreError::InvalidReference { table: "locations", id: 7 })
        ));
        assert!(matches!(
            store.store_sample(1.0, 1, 0),
            Err(StoreError::InvalidReference { table: "timestamps", id: 0 })
        ));
        assert!(matches!(
            store.store_sample(f64::NAN, 1, 1),
            Err(StoreError::InvalidSample(_))
        ));

        // a batch with one bad reference stores nothing
        assert!(matches!(
            store.store_samples(&[(1.0, 1, 1), (2.0, 40, 1)]),
            Err(StoreError::InvalidReference { table: "locations", id: 40 })
        ));
        assert_eq!(store.samples_in_range(1, 1).unwrap().len(), 2);
        assert_eq!(store.metadata().unwrap().sample_count, 7);

        // a second metadata write updates rather than duplicates
        store.store_metadata(&Metadata::for_grid(2, 3)).unwrap();
        verify(store);

        let stats = store.stats().unwrap();
        assert_eq!(stats.backend, store.kind());
        assert!(stats.to_string().contains("Samples: 7"));

        store.disconnect().unwrap();
        assert!(matches!(store.locations(), Err(StoreError::NotConnected)));

        store.connect_read_only().unwrap();
        assert_eq!(store.status(), ConnectionStatus::ReadOnly);
        verify(store);
        assert!(matches!(
            store.store_timestamp(Timestamp::from_days(0)),
            Err(StoreError::ReadOnly)
        ));
        store.disconnect().unwrap();

        store.connect().unwrap();
        verify(store);
        store.clean().unwrap();
        assert!(store.locations().unwrap().is_empty());
        assert!(store.samples_in_range(1, 3).unwrap().is_empty());
        assert_eq!(store.metadata().unwrap().sample_count, 0);
        assert_eq!(store.store_location(&Location::new(4, 4)).unwrap(), 1);
        store.disconnect().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("SQLite".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert_eq!("flat".parse::<BackendKind>().unwrap(), BackendKind::Flat);
        assert_eq!("ram".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("oracle".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default().to_string(), "relational");
    }

    #[test]
    fn test_retained_percent() {
        let meta = Metadata {
            rows: 10,
            cols: 10,
            timestamp_count: 4,
            location_count: 100,
            sample_count: 8,
        };
        assert!((meta.retained_percent() - 2.0).abs() < 1e-12);
        assert_eq!(Metadata::default().retained_percent(), 0.0);
    }

    #[test]
    fn test_counts_check_sample() {
        let counts = Counts {
            locations: 2,
            timestamps: 1,
            samples: 0,
        };
        assert!(counts.check_sample(5.0, 2, 1).is_ok());
        assert!(counts.check_sample(f64::INFINITY, 1, 1).is_err());
        assert!(counts.check_sample(5.0, 3, 1).is_err());
        assert!(counts.check_sample(5.0, 1, 2).is_err());
    }

    #[test]
    fn test_counts_check_batch() {
        let counts = Counts {
            locations: 1,
            timestamps: 1,
            samples: 0,
        };
        assert!(counts.check_batch(&[(1.0, 1, 1), (2.0, 1, 1)]).is_ok());
        assert!(counts.check_batch(&[(1.0, 1, 1), (2.0, 40, 1)]).is_err());
        assert!(counts.check_batch(&[]).is_ok());
    }

    #[test]
    fn test_status_checks() {
        assert!(ConnectionStatus::Connected.check_writable().is_ok());
        assert!(matches!(
            ConnectionStatus::ReadOnly.check_writable(),
            Err(StoreError::ReadOnly)
        ));
        assert!(ConnectionStatus::ReadOnly.check_readable().is_ok());
        assert!(matches!(
            ConnectionStatus::Disconnected.check_readable(),
            Err(StoreError::NotConnected)
        ));
    }

    #[test]
    fn test_open_store_kinds() {
        let dir = tempfile::tempdir().unwrap();
        for kind in [BackendKind::Memory, BackendKind::Flat, BackendKind::Relational] {
            let store = open_store(kind, dir.path(), "unit");
            assert_eq!(store.kind(), kind);
            conformance::exercise(store.as_ref());
        }
    }
}
