//! Store error types

use crate::query::QueryError;
use crate::store::BackendKind;
use thiserror::Error;

/// Errors raised by [`GriddedStore`](crate::store::GriddedStore) backends
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bad magic, version or checksum in a table file
    #[error("Corrupt data: {0}")]
    Corruption(String),

    #[error("Store is not connected")]
    NotConnected,

    /// Write attempted on a read-only connection
    #[error("Store is connected read-only")]
    ReadOnly,

    /// A sample referenced a location or timestamp that was never stored
    #[error("Invalid reference: no {table} row with id {id}")]
    InvalidReference { table: &'static str, id: u64 },

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
