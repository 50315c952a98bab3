//! Sample predicates
//!
//! A small filter language evaluated by stores that can run ad-hoc queries
//! (the relational backend compiles it to parameterized SQL):
//!
//! ```text
//! [WHERE] value > 300 AND day BETWEEN '2000-01-01' AND '2000-01-31' [LIMIT n]
//! ```
//!
//! ```rust,ignore
//! use condense::query::parse_predicate;
//!
//! let predicate = parse_predicate("value > 300 AND row < 10 LIMIT 50")?;
//! let samples = store.query_samples(&predicate)?;
//! ```

mod ast;
mod error;
mod parser;

pub use ast::{Condition, Field, Literal, Operator, Predicate};
pub use error::{QueryError, QueryResult};
pub use parser::parse_predicate;
