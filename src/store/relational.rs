//! Relational store backed by SQLite
//!
//! Tables mirror the logical schema one to one, with foreign keys enforced
//! by SQLite and an index on `samples(timestamp_id)` for per-day reads.
//! [`Predicate`]s compile to parameterized SQL over the joined tables:
//!
//! ```text
//! SELECT s.* FROM samples s
//!   JOIN locations l  ON l.id = s.location_id
//!   JOIN timestamps t ON t.id = s.timestamp_id
//! WHERE <conditions> ORDER BY s.id [LIMIT n]
//! ```

use crate::calendar::Timestamp;
use crate::grid::Location;
use crate::query::{Condition, Field, Predicate};
use crate::store::{
    BackendKind, ConnectionStatus, Counts, GriddedStore, LocationId, Metadata, Sample, SampleId,
    StoreError, StoreResult, TimestampId,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metadata (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        rows INTEGER NOT NULL,
        cols INTEGER NOT NULL,
        timestamp_count INTEGER NOT NULL,
        location_count INTEGER NOT NULL,
        sample_count INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS locations (
        id INTEGER PRIMARY KEY,
        row INTEGER NOT NULL,
        col INTEGER NOT NULL,
        lat REAL,
        lon REAL
    );
    CREATE TABLE IF NOT EXISTS timestamps (
        id INTEGER PRIMARY KEY,
        day_index INTEGER NOT NULL,
        year INTEGER NOT NULL,
        month INTEGER NOT NULL,
        day INTEGER NOT NULL,
        day_of_year INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY,
        value REAL NOT NULL,
        location_id INTEGER NOT NULL REFERENCES locations(id),
        timestamp_id INTEGER NOT NULL REFERENCES timestamps(id)
    );
    CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp_id);
";

const DROP_SCHEMA: &str = "
    DROP INDEX IF EXISTS idx_samples_timestamp;
    DROP TABLE IF EXISTS samples;
    DROP TABLE IF EXISTS timestamps;
    DROP TABLE IF EXISTS locations;
    DROP TABLE IF EXISTS metadata;
";

const SELECT_SAMPLES: &str =
    "SELECT s.id, s.value, s.location_id, s.timestamp_id FROM samples s";

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        id: row.get::<_, i64>(0)? as SampleId,
        value: row.get(1)?,
        location_id: row.get(2)?,
        timestamp_id: row.get(3)?,
    })
}

/// Column backing a predicate field
fn column(field: Field) -> &'static str {
    match field {
        Field::Value => "s.value",
        Field::Row => "l.row",
        Field::Col => "l.col",
        Field::Lat => "l.lat",
        Field::Lon => "l.lon",
        Field::Day => "t.day_index",
        Field::Year => "t.year",
        Field::Month => "t.month",
        Field::DayOfYear => "t.day_of_year",
        Field::Location => "s.location_id",
        Field::Timestamp => "s.timestamp_id",
    }
}

/// Build the SQL text and bound parameters for a predicate
fn compile(predicate: &Predicate) -> (String, Vec<Value>) {
    let mut sql = format!(
        "{} JOIN locations l ON l.id = s.location_id \
         JOIN timestamps t ON t.id = s.timestamp_id",
        SELECT_SAMPLES
    );
    let mut values = Vec::new();
    let mut clauses = Vec::with_capacity(predicate.conditions.len());

    for condition in &predicate.conditions {
        match condition {
            Condition::Compare { field, op, value } => {
                clauses.push(format!("{} {} ?", column(*field), op.symbol()));
                values.push(Value::Real(value.as_f64()));
            }
            Condition::Between { field, low, high } => {
                clauses.push(format!("{} BETWEEN ? AND ?", column(*field)));
                values.push(Value::Real(low.as_f64()));
                values.push(Value::Real(high.as_f64()));
            }
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.id");
    if let Some(limit) = predicate.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
    }
    (sql, values)
}

struct RelationalState {
    conn: Option<Connection>,
    status: ConnectionStatus,
    counts: Counts,
}

impl RelationalState {
    fn readable(&self) -> StoreResult<&Connection> {
        self.status.check_readable()?;
        self.conn.as_ref().ok_or(StoreError::NotConnected)
    }

    fn writable(&mut self) -> StoreResult<&mut Connection> {
        self.status.check_writable()?;
        self.conn.as_mut().ok_or(StoreError::NotConnected)
    }
}

/// SQLite-backed store with ad-hoc predicate queries.
///
/// One connection serves all callers; statements run one at a time under
/// the store's lock.
pub struct RelationalStore {
    path: PathBuf,
    state: Mutex<RelationalState>,
}

impl RelationalStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(RelationalState {
                conn: None,
                status: ConnectionStatus::Disconnected,
                counts: Counts::default(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, RelationalState>> {
        self.state.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn open(&self, status: ConnectionStatus) -> StoreResult<()> {
        let writable = status == ConnectionStatus::Connected;
        let conn = if writable {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                ",
            )?;
            conn.execute_batch(SCHEMA)?;
            conn
        } else {
            Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };

        let counts = recover_counts(&conn)?;
        if let Some(stored) = read_metadata_row(&conn)? {
            counts.reconcile(BackendKind::Relational, &stored);
        }

        tracing::debug!(
            path = %self.path.display(),
            locations = counts.locations,
            timestamps = counts.timestamps,
            samples = counts.samples,
            read_only = !writable,
            "Opened relational store"
        );

        let mut state = self.lock()?;
        *state = RelationalState {
            conn: Some(conn),
            status,
            counts,
        };
        Ok(())
    }
}

/// Rebuild counts from the tables themselves
fn recover_counts(conn: &Connection) -> StoreResult<Counts> {
    let count = |table: &str| -> StoreResult<i64> {
        let (rows, max_id): (i64, i64) = conn.query_row(
            &format!("SELECT COUNT(*), COALESCE(MAX(id), 0) FROM {}", table),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if rows != max_id {
            return Err(StoreError::Corruption(format!(
                "{} holds {} rows but ids reach {}",
                table, rows, max_id
            )));
        }
        Ok(rows)
    };
    Ok(Counts {
        locations: count("locations")? as u32,
        timestamps: count("timestamps")? as u32,
        samples: count("samples")? as u64,
    })
}

fn read_metadata_row(conn: &Connection) -> StoreResult<Option<Metadata>> {
    let row = conn
        .query_row(
            "SELECT rows, cols, timestamp_count, location_count, sample_count
             FROM metadata WHERE id = 1",
            [],
            |row| {
                Ok(Metadata {
                    rows: row.get(0)?,
                    cols: row.get(1)?,
                    timestamp_count: row.get(2)?,
                    location_count: row.get(3)?,
                    sample_count: row.get::<_, i64>(4)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn write_metadata_row(conn: &Connection, metadata: &Metadata) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO metadata (id, rows, cols, timestamp_count, location_count, sample_count)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            rows = excluded.rows,
            cols = excluded.cols,
            timestamp_count = excluded.timestamp_count,
            location_count = excluded.location_count,
            sample_count = excluded.sample_count",
        params![
            metadata.rows,
            metadata.cols,
            metadata.timestamp_count,
            metadata.location_count,
            metadata.sample_count as i64
        ],
    )?;
    Ok(())
}

fn insert_sample(
    conn: &Connection,
    counts: &mut Counts,
    value: f64,
    location: LocationId,
    timestamp: TimestampId,
) -> StoreResult<SampleId> {
    counts.check_sample(value, location, timestamp)?;
    let id = counts.samples + 1;
    conn.prepare_cached(
        "INSERT INTO samples (id, value, location_id, timestamp_id) VALUES (?, ?, ?, ?)",
    )?
    .execute(params![id as i64, value, location, timestamp])?;
    counts.samples = id;
    Ok(id)
}

impl GriddedStore for RelationalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
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
        if state.status == ConnectionStatus::Connected {
            let counts = state.counts;
            if let Some(conn) = state.conn.as_ref() {
                let (rows, cols) = read_metadata_row(conn)?
                    .map(|m| (m.rows, m.cols))
                    .unwrap_or((0, 0));
                write_metadata_row(conn, &counts.metadata(rows, cols))?;
            }
        }
        if let Some(conn) = state.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        state.status = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn clean(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        let conn = state.writable()?;
        conn.execute_batch(DROP_SCHEMA)?;
        conn.execute_batch(SCHEMA)?;
        state.counts = Counts::default();
        Ok(())
    }

    fn store_location(&self, location: &Location) -> StoreResult<LocationId> {
        let mut state = self.lock()?;
        let id = state.counts.locations + 1;
        state
            .writable()?
            .prepare_cached("INSERT INTO locations (id, row, col, lat, lon) VALUES (?, ?, ?, ?, ?)")?
            .execute(params![id, location.row, location.col, location.lat(), location.lon()])?;
        state.counts.locations = id;
        Ok(id)
    }

    fn store_timestamp(&self, timestamp: Timestamp) -> StoreResult<TimestampId> {
        let mut state = self.lock()?;
        let id = state.counts.timestamps + 1;
        let (year, month, day) = timestamp.ymd();
        state
            .writable()?
            .prepare_cached(
                "INSERT INTO timestamps (id, day_index, year, month, day, day_of_year)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?
            .execute(params![
                id,
                timestamp.days(),
                year,
                month,
                day,
                timestamp.day_of_year()
            ])?;
        state.counts.timestamps = id;
        Ok(id)
    }

    fn store_sample(
        &self,
        value: f64,
        location: LocationId,
        timestamp: TimestampId,
    ) -> StoreResult<SampleId> {
        let mut state = self.lock()?;
        let mut counts = state.counts;
        let id = insert_sample(state.writable()?, &mut counts, value, location, timestamp)?;
        state.counts = counts;
        Ok(id)
    }

    fn store_samples(
        &self,
        samples: &[(f64, LocationId, TimestampId)],
    ) -> StoreResult<Vec<SampleId>> {
        let mut state = self.lock()?;
        let mut counts = state.counts;
        let tx = state.writable()?.transaction()?;
        let mut ids = Vec::with_capacity(samples.len());
        for &(value, location, timestamp) in samples {
            ids.push(insert_sample(&tx, &mut counts, value, location, timestamp)?);
        }
        tx.commit()?;
        state.counts = counts;
        Ok(ids)
    }

    fn store_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        let mut state = self.lock()?;
        let current = state.counts.metadata(metadata.rows, metadata.cols);
        write_metadata_row(state.writable()?, &current)
    }

    fn metadata(&self) -> StoreResult<Metadata> {
        let state = self.lock()?;
        let stored = read_metadata_row(state.readable()?)?;
        let (rows, cols) = stored.map(|m| (m.rows, m.cols)).unwrap_or((0, 0));
        Ok(state.counts.metadata(rows, cols))
    }

    fn locations(&self) -> StoreResult<Vec<Location>> {
        let state = self.lock()?;
        let mut stmt = state
            .readable()?
            .prepare_cached("SELECT row, col, lat, lon FROM locations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let location = Location::new(row.get(0)?, row.get(1)?);
            let lat: Option<f64> = row.get(2)?;
            let lon: Option<f64> = row.get(3)?;
            Ok(match (lat, lon) {
                (Some(lat), Some(lon)) => location.with_coords(lat, lon),
                _ => location,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn timestamps(&self) -> StoreResult<Vec<Timestamp>> {
        let state = self.lock()?;
        let mut stmt = state
            .readable()?
            .prepare_cached("SELECT day_index FROM timestamps ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok(Timestamp::from_days(row.get(0)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn samples_at_timestamp(&self, timestamp: TimestampId) -> StoreResult<Vec<Sample>> {
        let state = self.lock()?;
        let mut stmt = state.readable()?.prepare_cached(&format!(
            "{} WHERE s.timestamp_id = ? ORDER BY s.id",
            SELECT_SAMPLES
        ))?;
        let rows = stmt.query_map(params![timestamp], sample_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn samples_in_range(
        &self,
        first: TimestampId,
        last: TimestampId,
    ) -> StoreResult<Vec<Sample>> {
        let state = self.lock()?;
        let mut stmt = state.readable()?.prepare_cached(&format!(
            "{} WHERE s.timestamp_id BETWEEN ? AND ? ORDER BY s.id",
            SELECT_SAMPLES
        ))?;
        let rows = stmt.query_map(params![first, last], sample_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_samples(&self, predicate: &Predicate) -> StoreResult<Vec<Sample>> {
        predicate.validate()?;
        let (sql, values) = compile(predicate);
        tracing::debug!(sql = %sql, params = values.len(), "Running sample query");

        let state = self.lock()?;
        let mut stmt = state.readable()?.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), sample_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
