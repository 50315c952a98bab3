//! Predicate AST
//!
//! A predicate is a conjunction of comparisons over sample, location and
//! timestamp attributes, with an optional row limit.

use crate::calendar::Timestamp;
use crate::query::error::{QueryError, QueryResult};
use std::fmt;

/// Attribute a condition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Sample value
    Value,
    /// Grid row of the sample's location
    Row,
    /// Grid column of the sample's location
    Col,
    /// Location latitude; cells without coordinates never match
    Lat,
    /// Location longitude; cells without coordinates never match
    Lon,
    /// Day index, compared against a day number or a `'YYYY-MM-DD'` date
    Day,
    /// Calendar year of the timestamp
    Year,
    /// Calendar month, 1-12
    Month,
    /// Day of year, 1-366
    DayOfYear,
    /// Location id
    Location,
    /// Timestamp id
    Timestamp,
}

impl Field {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name.to_ascii_lowercase().as_str() {
            "value" => Field::Value,
            "row" => Field::Row,
            "col" | "column" => Field::Col,
            "lat" | "latitude" => Field::Lat,
            "lon" | "longitude" => Field::Lon,
            "day" | "date" => Field::Day,
            "year" => Field::Year,
            "month" => Field::Month,
            "doy" | "day_of_year" => Field::DayOfYear,
            "location" | "location_id" => Field::Location,
            "timestamp" | "timestamp_id" => Field::Timestamp,
            _ => return None,
        };
        Some(field)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Value => "value",
            Field::Row => "row",
            Field::Col => "col",
            Field::Lat => "lat",
            Field::Lon => "lon",
            Field::Day => "day",
            Field::Year => "year",
            Field::Month => "month",
            Field::DayOfYear => "doy",
            Field::Location => "location",
            Field::Timestamp => "timestamp",
        }
    }

    /// Whether dates are meaningful literals for this field
    pub fn accepts_dates(&self) -> bool {
        matches!(self, Field::Day)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }
}

/// A literal operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Number(f64),
    Date(Timestamp),
}

impl Literal {
    /// Numeric form; dates become their day index
    pub fn as_f64(&self) -> f64 {
        match self {
            Literal::Number(n) => *n,
            Literal::Date(t) => t.days() as f64,
        }
    }
}

/// One conjunct of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        field: Field,
        op: Operator,
        value: Literal,
    },
    /// Inclusive range
    Between {
        field: Field,
        low: Literal,
        high: Literal,
    },
}

impl Condition {
    pub fn field(&self) -> Field {
        match self {
            Condition::Compare { field, .. } | Condition::Between { field, .. } => *field,
        }
    }

    fn literals(&self) -> Vec<Literal> {
        match self {
            Condition::Compare { value, .. } => vec![*value],
            Condition::Between { low, high, .. } => vec![*low, *high],
        }
    }
}

/// A parsed predicate: all conditions must hold
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
}

impl Predicate {
    /// Predicate matching every sample
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject date literals on non-date fields and empty ranges
    pub fn validate(&self) -> QueryResult<()> {
        for condition in &self.conditions {
            let field = condition.field();
            for literal in condition.literals() {
                if matches!(literal, Literal::Date(_)) && !field.accepts_dates() {
                    return Err(QueryError::InvalidValue(format!(
                        "date literal not allowed for field '{}'",
                        field
                    )));
                }
            }
            if let Condition::Between { low, high, .. } = condition {
                if low.as_f64() > high.as_f64() {
                    return Err(QueryError::InvalidValue(format!(
                        "empty range for field '{}'",
                        field
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in [
            Field::Value,
            Field::Row,
            Field::Col,
            Field::Lat,
            Field::Lon,
            Field::Day,
            Field::Year,
            Field::Month,
            Field::DayOfYear,
            Field::Location,
            Field::Timestamp,
        ] {
            assert_eq!(Field::from_name(field.name()), Some(field));
        }
        assert_eq!(Field::from_name("LATITUDE"), Some(Field::Lat));
        assert_eq!(Field::from_name("mood"), None);
    }

    #[test]
    fn test_validate_rejects_misplaced_dates() {
        let date = Literal::Date(Timestamp::from_ymd(2000, 1, 1).unwrap());
        let bad = Predicate::all().and(Condition::Compare {
            field: Field::Value,
            op: Operator::Gt,
            value: date,
        });
        assert!(matches!(bad.validate(), Err(QueryError::InvalidValue(_))));

        let good = Predicate::all().and(Condition::Compare {
            field: Field::Day,
            op: Operator::Gte,
            value: date,
        });
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let p = Predicate::all().and(Condition::Between {
            field: Field::Row,
            low: Literal::Number(10.0),
            high: Literal::Number(2.0),
        });
        assert!(p.validate().is_err());
    }
}
