//! In-memory store
//!
//! Tables live in vectors behind a lock for as long as the store value does.
//! Disconnecting only changes the connection state; dropping the store
//! loses everything.

use crate::calendar::Timestamp;
use crate::grid::Location;
use crate::store::{
    BackendKind, ConnectionStatus, Counts, GriddedStore, LocationId, Metadata, Sample, SampleId,
    StoreError, StoreResult, TimestampId,
};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Tables {
    status: ConnectionStatus,
    rows: u32,
    cols: u32,
    locations: Vec<Location>,
    timestamps: Vec<Timestamp>,
    samples: Vec<Sample>,
}

impl Tables {
    fn counts(&self) -> Counts {
        Counts {
            locations: self.locations.len() as u32,
            timestamps: self.timestamps.len() as u32,
            samples: self.samples.len() as u64,
        }
    }

    fn push_sample(
        &mut self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId> {
        self.counts().check_sample(value, location, timestamp)?;
        let id = self.samples.len() as SampleId + 1;
        self.samples.push(Sample {
            id,
            value,
            location_id: location,
            timestamp_id: timestamp,
        });
        Ok(id)
    }
}

/// Volatile backend for tests and short-lived runs
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                status: ConnectionStatus::Disconnected,
                rows: 0,
                cols: 0,
                locations: Vec::new(),
                timestamps: Vec::new(),
                samples: Vec::new(),
            }),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        let tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        tables.status.check_readable()?;
        Ok(tables)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        let tables = self
            .tables
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        tables.status.check_writable()?;
        Ok(tables)
    }

    fn set_status(&self, status: ConnectionStatus) -> StoreResult<()> {
        self.tables
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))?
            .status = status;
        Ok(())
    }
}

impl GriddedStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn status(&self) -> ConnectionStatus {
        self.tables
            .read()
            .map(|t| t.status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    fn connect(&self) -> StoreResult<()> {
        self.set_status(ConnectionStatus::Connected)
    }

    fn connect_read_only(&self) -> StoreResult<()> {
        self.set_status(ConnectionStatus::ReadOnly)
    }

    fn disconnect(&self) -> StoreResult<()> {
        self.set_status(ConnectionStatus::Disconnected)
    }

    fn clean(&self) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.rows = 0;
        tables.cols = 0;
        tables.locations.clear();
        tables.timestamps.clear();
        tables.samples.clear();
        Ok(())
    }

    fn store_location(&self, location: &Location) -> StoreResult<LocationId> {
        let mut tables = self.write()?;
        tables.locations.push(*location);
        Ok(tables.locations.len() as LocationId)
    }

    fn store_timestamp(&self, timestamp: Timestamp) -> StoreResult<TimestampId> {
        let mut tables = self.write()?;
        tables.timestamps.push(timestamp);
        Ok(tables.timestamps.len() as TimestampId)
    }

    fn store_sample(
        &self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId> {
        self.write()?.push_sample(value, location, timestamp)
    }

    fn store_samples(
        &self,
        samples: &[(f64, LocationId, TimestampId)],
    ) -> StoreResult<Vec<SampleId>> {
        let mut tables = self.write()?;
        tables.counts().check_batch(samples)?;
        samples
            .iter()
            .map(|&(value, location, timestamp)| tables.push_sample(value, location, timestamp))
            .collect()
    }

    fn store_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.rows = metadata.rows;
        tables.cols = metadata.cols;
        Ok(())
    }

    fn metadata(&self) -> StoreResult<Metadata> {
        let tables = self.read()?;
        Ok(tables.counts().metadata(tables.rows, tables.cols))
    }

    fn locations(&self) -> StoreResult<Vec<Location>> {
        Ok(self.read()?.locations.clone())
    }

    fn timestamps(&self) -> StoreResult<Vec<Timestamp>> {
        Ok(self.read()?.timestamps.clone())
    }

    fn samples_at_timestamp(&self, timestamp: TimestampId) -> StoreResult<Vec<Sample>> {
        self.samples_in_range(timestamp, timestamp)
    }

    fn samples_in_range(
        &self,
        first: TimestampId,
        last: TimestampId,
    ) -> StoreResult<Vec<Sample>> {
        Ok(self
            .read()?
            .samples
            .iter()
            .filter(|s| (first..=last).contains(&s.timestamp_id))
            .copied()
            .collect())
    }
}
