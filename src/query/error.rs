//! Query error types

use thiserror::Error;

/// Errors raised while parsing or checking a predicate
#[derive(Error, Debug)]
pub enum QueryError {
    /// Predicate text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unknown attribute name
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Literal unsuitable for its field
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
