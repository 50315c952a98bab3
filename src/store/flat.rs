//! Flat-binary store
//!
//! Each table is an append-only file of fixed-width little-endian records
//! behind a checksummed header. There is no index: reads scan the whole
//! table and filter.
//!
//! ```text
//! {dir}/{name}_locations.db    {dir}/{name}_timestamps.db
//! {dir}/{name}_samples.db      {dir}/{name}_metadata.db (bincode)
//!
//! ┌──────────────────────────────────────┐
//! │ HEADER (16 bytes)                    │
//! │   magic: [u8; 4] = "CNDS"            │
//! │   version: u16                       │
//! │   table: u8, reserved: u8            │
//! │   record_size: u16, reserved: u16    │
//! │   checksum: u32 (crc32 of 0..12)     │
//! ├──────────────────────────────────────┤
//! │ RECORDS (record_size bytes each)     │
//! │   locations:  id u32, row u32,       │
//! │               col u32, lat f64,      │
//! │               lon f64 (NaN = none)   │
//! │   timestamps: id u32, day_index i32, │
//! │               year i32, month u8,    │
//! │               day u8, doy u16        │
//! │   samples:    id u64, value f64,     │
//! │               location u32,          │
//! │               timestamp u32          │
//! └──────────────────────────────────────┘
//! ```
//!
//! Counts are rebuilt from file lengths on connect. A trailing partial
//! record left by an interrupted write is truncated away.

use crate::calendar::Timestamp;
use crate::grid::Location;
use crate::store::{
    BackendKind, ConnectionStatus, Counts, GriddedStore, LocationId, Metadata, Sample, SampleId,
    StoreError, StoreResult, TimestampId,
};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Magic bytes for table file identification
const TABLE_MAGIC: [u8; 4] = *b"CNDS";

const TABLE_VERSION: u16 = 1;

const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Table {
    Locations = 1,
    Timestamps = 2,
    Samples = 3,
}

impl Table {
    fn record_size(self) -> usize {
        match self {
            Table::Locations => 28,
            Table::Timestamps => 16,
            Table::Samples => 24,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Table::Locations => "locations",
            Table::Timestamps => "timestamps",
            Table::Samples => "samples",
        }
    }

    fn header(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&TABLE_MAGIC);
        buf[4..6].copy_from_slice(&TABLE_VERSION.to_le_bytes());
        buf[6] = self as u8;
        buf[8..10].copy_from_slice(&(self.record_size() as u16).to_le_bytes());
        let checksum = crc32fast::hash(&buf[0..12]);
        buf[12..16].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn check_header(self, buf: &[u8; HEADER_SIZE]) -> StoreResult<()> {
        let stored_checksum = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let computed_checksum = crc32fast::hash(&buf[0..12]);
        if stored_checksum != computed_checksum {
            return Err(StoreError::Corruption(format!(
                "{} header checksum mismatch: stored={}, computed={}",
                self.name(),
                stored_checksum,
                computed_checksum
            )));
        }
        if buf[0..4] != TABLE_MAGIC {
            return Err(StoreError::Corruption(format!(
                "{} has invalid magic: {:?}",
                self.name(),
                &buf[0..4]
            )));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > TABLE_VERSION {
            return Err(StoreError::Corruption(format!(
                "{} has unsupported version {}",
                self.name(),
                version
            )));
        }
        let record_size = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        if buf[6] != self as u8 || record_size != self.record_size() {
            return Err(StoreError::Corruption(format!(
                "{} header describes table {} with {}-byte records",
                self.name(),
                buf[6],
                record_size
            )));
        }
        Ok(())
    }
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn le_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_bits(le_u64(buf, at))
}

fn encode_location(id: LocationId, location: &Location) -> Vec<u8> {
    let (lat, lon) = location.coords.unwrap_or((f64::NAN, f64::NAN));
    let mut buf = Vec::with_capacity(Table::Locations.record_size());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&location.row.to_le_bytes());
    buf.extend_from_slice(&location.col.to_le_bytes());
    buf.extend_from_slice(&lat.to_le_bytes());
    buf.extend_from_slice(&lon.to_le_bytes());
    buf
}

fn decode_location(buf: &[u8]) -> (LocationId, Location) {
    let location = Location::new(le_u32(buf, 4), le_u32(buf, 8));
    let (lat, lon) = (le_f64(buf, 12), le_f64(buf, 20));
    let location = if lat.is_nan() || lon.is_nan() {
        location
    } else {
        location.with_coords(lat, lon)
    };
    (le_u32(buf, 0), location)
}

fn encode_timestamp(id: TimestampId, timestamp: Timestamp) -> Vec<u8> {
    let (year, month, day) = timestamp.ymd();
    let mut buf = Vec::with_capacity(Table::Timestamps.record_size());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&timestamp.days().to_le_bytes());
    buf.extend_from_slice(&year.to_le_bytes());
    buf.push(month as u8);
    buf.push(day as u8);
    buf.extend_from_slice(&(timestamp.day_of_year() as u16).to_le_bytes());
    buf
}

fn decode_timestamp(buf: &[u8]) -> (TimestampId, Timestamp) {
    let days = le_u32(buf, 4) as i32;
    (le_u32(buf, 0), Timestamp::from_days(days))
}

fn encode_sample(sample: &Sample) -> Vec<u8> {
    let mut buf = Vec::with_capacity(Table::Samples.record_size());
    buf.extend_from_slice(&sample.id.to_le_bytes());
    buf.extend_from_slice(&sample.value.to_le_bytes());
    buf.extend_from_slice(&sample.location_id.to_le_bytes());
    buf.extend_from_slice(&sample.timestamp_id.to_le_bytes());
    buf
}

fn decode_sample(buf: &[u8]) -> Sample {
    Sample {
        id: le_u64(buf, 0),
        value: le_f64(buf, 8),
        location_id: le_u32(buf, 16),
        timestamp_id: le_u32(buf, 20),
    }
}

/// Ids are dense, so the n-th record must carry id n
fn check_id(table: Table, expected: u64, found: u64) -> StoreResult<()> {
    if expected != found {
        return Err(StoreError::Corruption(format!(
            "{} record {} carries id {}",
            table.name(),
            expected,
            found
        )));
    }
    Ok(())
}

/// One open table file
struct TableFile {
    table: Table,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: u64,
}

impl TableFile {
    /// Truncate (or create) the file down to a bare header
    fn create(path: PathBuf, table: Table) -> StoreResult<Self> {
        let mut file = File::create(&path)?;
        file.write_all(&table.header())?;
        file.flush()?;
        drop(file);
        Self::open(path, table, true)
    }

    fn open(path: PathBuf, table: Table, writable: bool) -> StoreResult<Self> {
        if writable && std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true) {
            return Self::create(path, table);
        }

        let mut file = File::open(&path)?;
        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;
        table.check_header(&header)?;

        let body = file.metadata()?.len() - HEADER_SIZE as u64;
        let record_size = table.record_size() as u64;
        let records = body / record_size;
        let partial = body % record_size;
        drop(file);

        if partial != 0 {
            tracing::warn!(
                table = table.name(),
                records,
                partial_bytes = partial,
                "Trailing partial record in {}",
                path.display()
            );
            if writable {
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(HEADER_SIZE as u64 + records * record_size)?;
            }
        }

        let writer = if writable {
            Some(BufWriter::new(OpenOptions::new().append(true).open(&path)?))
        } else {
            None
        };

        Ok(Self {
            table,
            path,
            writer,
            records,
        })
    }

    fn append(&mut self, record: &[u8]) -> StoreResult<()> {
        let writer = self.writer.as_mut().ok_or(StoreError::ReadOnly)?;
        writer.write_all(record)?;
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Visit every complete record in file order
    fn scan<F>(&mut self, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(u64, &[u8]) -> StoreResult<()>,
    {
        self.flush()?;
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut record = vec![0u8; self.table.record_size()];
        for index in 0..self.records {
            reader.read_exact(&mut record)?;
            visit(index + 1, &record)?;
        }
        Ok(())
    }
}

struct FlatTables {
    locations: TableFile,
    timestamps: TableFile,
    samples: TableFile,
}

impl FlatTables {
    fn counts(&self) -> Counts {
        Counts {
            locations: self.locations.records as u32,
            timestamps: self.timestamps.records as u32,
            samples: self.samples.records,
        }
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.locations.flush()?;
        self.timestamps.flush()?;
        self.samples.flush()
    }

    fn push_sample(
        &mut self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId> {
        self.counts().check_sample(value, location, timestamp)?;
        let id = self.samples.records + 1;
        self.samples.append(&encode_sample(&Sample {
            id,
            value,
            location_id: location,
            timestamp_id: timestamp,
        }))?;
        Ok(id)
    }
}

struct FlatState {
    status: ConnectionStatus,
    tables: Option<FlatTables>,
    rows: u32,
    cols: u32,
}

impl FlatState {
    fn readable(&mut self) -> StoreResult<&mut FlatTables> {
        self.status.check_readable()?;
        self.tables.as_mut().ok_or(StoreError::NotConnected)
    }

    fn writable(&mut self) -> StoreResult<&mut FlatTables> {
        self.status.check_writable()?;
        self.tables.as_mut().ok_or(StoreError::NotConnected)
    }
}

/// Append-only fixed-width record files, one per table
pub struct FlatStore {
    dir: PathBuf,
    name: String,
    state: Mutex<FlatState>,
}

impl FlatStore {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.to_string(),
            state: Mutex::new(FlatState {
                status: ConnectionStatus::Disconnected,
                tables: None,
                rows: 0,
                cols: 0,
            }),
        }
    }

    fn table_path(&self, table: Table) -> PathBuf {
        self.dir.join(format!("{}_{}.db", self.name, table.name()))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}_metadata.db", self.name))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, FlatState>> {
        self.state.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn open_tables(&self, writable: bool) -> StoreResult<FlatTables> {
        Ok(FlatTables {
            locations: TableFile::open(self.table_path(Table::Locations), Table::Locations, writable)?,
            timestamps: TableFile::open(
                self.table_path(Table::Timestamps),
                Table::Timestamps,
                writable,
            )?,
            samples: TableFile::open(self.table_path(Table::Samples), Table::Samples, writable)?,
        })
    }

    fn read_metadata(&self) -> StoreResult<Option<Metadata>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    fn write_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        std::fs::write(self.metadata_path(), bincode::serialize(metadata)?)?;
        Ok(())
    }

    fn open(&self, status: ConnectionStatus) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(mut previous) = state.tables.take() {
            previous.flush()?;
        }
        state.status = ConnectionStatus::Disconnected;

        let writable = status == ConnectionStatus::Connected;
        if writable {
            std::fs::create_dir_all(&self.dir)?;
        }

        let tables = self.open_tables(writable)?;
        let counts = tables.counts();
        let (rows, cols) = match self.read_metadata()? {
            Some(stored) => {
                counts.reconcile(BackendKind::Flat, &stored);
                (stored.rows, stored.cols)
            }
            None => (0, 0),
        };

        tracing::debug!(
            dir = %self.dir.display(),
            name = %self.name,
            locations = counts.locations,
            timestamps = counts.timestamps,
            samples = counts.samples,
            "Opened flat store"
        );

        *state = FlatState {
            status,
            tables: Some(tables),
            rows,
            cols,
        };
        Ok(())
    }
}

impl GriddedStore for FlatStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn status(&self) -> ConnectionStatus {
        self.state
            .lock()
            .map(|s| s.status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    fn connect(&self) -> StoreResult<()> {
        self.open(ConnectionStatus::Connected)
    }

    fn connect_read_only(&self) -> StoreResult<()> {
        self.open(ConnectionStatus::ReadOnly)
    }

    fn disconnect(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        let (rows, cols) = (state.rows, state.cols);
        if state.status == ConnectionStatus::Connected {
            if let Some(tables) = state.tables.as_mut() {
                tables.flush()?;
                let metadata = tables.counts().metadata(rows, cols);
                self.write_metadata(&metadata)?;
            }
        }
        state.tables = None;
        state.status = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn clean(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.status.check_writable()?;
        if let Some(mut previous) = state.tables.take() {
            previous.flush()?;
        }
        state.tables = Some(FlatTables {
            locations: TableFile::create(self.table_path(Table::Locations), Table::Locations)?,
            timestamps: TableFile::create(self.table_path(Table::Timestamps), Table::Timestamps)?,
            samples: TableFile::create(self.table_path(Table::Samples), Table::Samples)?,
        });
        let metadata_path = self.metadata_path();
        if metadata_path.exists() {
            std::fs::remove_file(metadata_path)?;
        }
        state.rows = 0;
        state.cols = 0;
        Ok(())
    }

    fn store_location(&self, location: &Location) -> StoreResult<LocationId> {
        let mut state = self.lock()?;
        let tables = state.writable()?;
        let id = tables.locations.records as LocationId + 1;
        tables.locations.append(&encode_location(id, location))?;
        Ok(id)
    }

    fn store_timestamp(&self, timestamp: Timestamp) -> StoreResult<TimestampId> {
        let mut state = self.lock()?;
        let tables = state.writable()?;
        let id = tables.timestamps.records as TimestampId + 1;
        tables.timestamps.append(&encode_timestamp(id, timestamp))?;
        Ok(id)
    }

    fn store_sample(
        &self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId> {
        self.lock()?.writable()?.push_sample(value, location, timestamp)
    }

    fn store_samples(
        &self,
        samples: &[(f64, LocationId, TimestampId)],
    ) -> StoreResult<Vec<SampleId>> {
        let mut state = self.lock()?;
        let tables = state.writable()?;
        tables.counts().check_batch(samples)?;
        samples
            .iter()
            .map(|&(value, location, timestamp)| tables.push_sample(value, location, timestamp))
            .collect()
    }

    fn store_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        let mut state = self.lock()?;
        let tables = state.writable()?;
        tables.flush()?;
        let current = tables.counts().metadata(metadata.rows, metadata.cols);
        self.write_metadata(&current)?;
        state.rows = metadata.rows;
        state.cols = metadata.cols;
        Ok(())
    }

    fn metadata(&self) -> StoreResult<Metadata> {
        let mut state = self.lock()?;
        let (rows, cols) = (state.rows, state.cols);
        Ok(state.readable()?.counts().metadata(rows, cols))
    }

    fn locations(&self) -> StoreResult<Vec<Location>> {
        let mut state = self.lock()?;
        let tables = state.readable()?;
        let mut locations = Vec::with_capacity(tables.locations.records as usize);
        tables.locations.scan(|index, record| {
            let (id, location) = decode_location(record);
            check_id(Table::Locations, index, id as u64)?;
            locations.push(location);
            Ok(())
        })?;
        Ok(locations)
    }

    fn timestamps(&self) -> StoreResult<Vec<Timestamp>> {
        let mut state = self.lock()?;
        let tables = state.readable()?;
        let mut timestamps = Vec::with_capacity(tables.timestamps.records as usize);
        tables.timestamps.scan(|index, record| {
            let (id, timestamp) = decode_timestamp(record);
            check_id(Table::Timestamps, index, id as u64)?;
            timestamps.push(timestamp);
            Ok(())
        })?;
        Ok(timestamps)
    }

    fn samples_at_timestamp(&self, timestamp: TimestampId) -> StoreResult<Vec<Sample>> {
        self.samples_in_range(timestamp, timestamp)
    }

    fn samples_in_range(
        &self,
        first: TimestampId,
        last: TimestampId,
    ) -> StoreResult<Vec<Sample>> {
        let mut state = self.lock()?;
        let tables = state.readable()?;
        let mut samples = Vec::new();
        tables.samples.scan(|index, record| {
            let sample = decode_sample(record);
            check_id(Table::Samples, index, sample.id)?;
            if (first..=last).contains(&sample.timestamp_id) {
                samples.push(sample);
            }
            Ok(())
        })?;
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use tempfile::tempdir;

    #[test]
    fn test_flat_conformance() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path(), "conformance");
        conformance::exercise(&store);
    }

    #[test]
    fn test_header_validation() {
        let header = Table::Samples.header();
        assert!(Table::Samples.check_header(&header).is_ok());
        assert!(matches!(
            Table::Locations.check_header(&header),
            Err(StoreError::Corruption(_))
        ));

        let mut damaged = header;
        damaged[9] ^= 0xff;
        assert!(matches!(
            Table::Samples.check_header(&damaged),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_record_layouts() {
        let loc = Location::new(7, 9).with_coords(-12.5, 130.25);
        let bytes = encode_location(3, &loc);
        assert_eq!(bytes.len(), Table::Locations.record_size());
        assert_eq!(decode_location(&bytes), (3, loc));
        let (_, plain) = decode_location(&encode_location(1, &Location::new(0, 0)));
        assert_eq!(plain.coords, None);

        let ts = Timestamp::from_ymd(1987, 12, 31).unwrap();
        let bytes = encode_timestamp(2, ts);
        assert_eq!(bytes.len(), Table::Timestamps.record_size());
        assert_eq!(decode_timestamp(&bytes), (2, ts));
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 365);

        let sample = Sample {
            id: 1 << 33,
            value: -0.5,
            location_id: 4,
            timestamp_id: 2,
        };
        let bytes = encode_sample(&sample);
        assert_eq!(bytes.len(), Table::Samples.record_size());
        assert_eq!(decode_sample(&bytes), sample);
    }

    #[test]
    fn test_reopen_recovers_counts_without_metadata_flush() {
        let dir = tempdir().unwrap();
        {
            let store = FlatStore::new(dir.path(), "crash");
            store.connect().unwrap();
            conformance::populate(&store);
            store.store_timestamp(Timestamp::from_days(11_100)).unwrap();
            store.store_sample(9.0, 2, 4).unwrap();
            // dropped without disconnect: metadata still says 7 samples
        }

        let store = FlatStore::new(dir.path(), "crash");
        store.connect_read_only().unwrap();
        let meta = store.metadata().unwrap();
        assert_eq!((meta.rows, meta.cols), (2, 3));
        assert_eq!(meta.timestamp_count, 4);
        assert_eq!(meta.sample_count, 8);
        assert_eq!(store.samples_at_timestamp(4).unwrap()[0].value, 9.0);
    }

    #[test]
    fn test_partial_record_truncated() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path(), "partial");
        store.connect().unwrap();
        conformance::populate(&store);
        store.disconnect().unwrap();

        let samples_path = dir.path().join("partial_samples.db");
        let full_len = std::fs::metadata(&samples_path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&samples_path).unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).unwrap();
        drop(file);

        store.connect().unwrap();
        assert_eq!(std::fs::metadata(&samples_path).unwrap().len(), full_len);
        conformance::verify(&store);
        assert_eq!(store.store_sample(1.5, 1, 1).unwrap(), 8);
        store.disconnect().unwrap();
    }

    #[test]
    fn test_corrupt_header_refuses_connect() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path(), "bad");
        store.connect().unwrap();
        store.disconnect().unwrap();

        std::fs::write(dir.path().join("bad_timestamps.db"), b"not a table file").unwrap();
        assert!(matches!(store.connect(), Err(StoreError::Corruption(_))));
        assert_eq!(store.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_read_only_requires_existing_tables() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path().join("absent"), "none");
        assert!(matches!(store.connect_read_only(), Err(StoreError::Io(_))));
    }
}
