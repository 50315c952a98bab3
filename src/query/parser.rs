//! Predicate Parser
//!
//! # Supported Syntax
//!
//! ```text
//! [WHERE] condition [AND condition ...] [LIMIT n]
//!
//! condition := field op literal
//!            | field BETWEEN literal AND literal
//! op        := = | == | != | <> | > | >= | < | <=
//! literal   := number | 'YYYY-MM-DD'
//! ```
//!
//! # Examples
//!
//! ```text
//! value > 300
//! WHERE day BETWEEN '2000-01-01' AND '2000-01-31' AND row >= 10 AND row < 20
//! value < 120 AND month = 2 LIMIT 100
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list1,
    sequence::{pair, tuple},
    IResult,
};

use crate::calendar::Timestamp;
use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};

/// Parse predicate text into a validated [`Predicate`]
pub fn parse_predicate(input: &str) -> QueryResult<Predicate> {
    let input = input.trim();

    match parse_full_predicate(input) {
        Ok((remaining, predicate)) => {
            if !remaining.trim().is_empty() {
                return Err(QueryError::Parse(format!(
                    "Unexpected input after predicate: '{}'",
                    remaining.trim()
                )));
            }
            predicate.validate()?;
            Ok(predicate)
        }
        Err(e) => Err(QueryError::Parse(format!("{:?}", e))),
    }
}

fn parse_full_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(pair(tag_no_case("WHERE"), multispace1))(input)?;
    let (input, conditions) = opt(separated_list1(
        tuple((multispace1, tag_no_case("AND"), multispace1)),
        parse_condition,
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, limit) = opt(parse_limit_clause)(input)?;
    let (input, _) = multispace0(input)?;

    Ok((
        input,
        Predicate {
            conditions: conditions.unwrap_or_default(),
            limit,
        },
    ))
}

fn parse_condition(input: &str) -> IResult<&str, Condition> {
    alt((parse_between, parse_comparison))(input)
}

/// `field BETWEEN low AND high`
fn parse_between(input: &str) -> IResult<&str, Condition> {
    let (input, field) = parse_field(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("BETWEEN"), multispace1))(input)?;
    let (input, low) = parse_literal(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("AND"), multispace1))(input)?;
    let (input, high) = parse_literal(input)?;
    Ok((input, Condition::Between { field, low, high }))
}

/// `field op literal`
fn parse_comparison(input: &str) -> IResult<&str, Condition> {
    let (input, field) = parse_field(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_literal(input)?;
    Ok((input, Condition::Compare { field, op, value }))
}

fn parse_limit_clause(input: &str) -> IResult<&str, usize> {
    let (input, _) = tag_no_case("LIMIT")(input)?;
    let (input, _) = multispace1(input)?;
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn parse_field(input: &str) -> IResult<&str, Field> {
    map_res(parse_identifier, |name: &str| {
        Field::from_name(name).ok_or_else(|| QueryError::InvalidField(name.to_string()))
    })(input)
}

/// Parse comparison operator
fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, alt((tag("!="), tag("<>")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
        value(Operator::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

fn parse_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(parse_date, Literal::Date),
        map(parse_number, Literal::Number),
    ))(input)
}

/// `'YYYY-MM-DD'`
fn parse_date(input: &str) -> IResult<&str, Timestamp> {
    map_res(parse_quoted_string, |s: &str| s.parse::<Timestamp>())(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, &str> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_while(|c| c != '\'')(input)?;
    let (input, _) = char('\'')(input)?;
    Ok((input, content))
}

/// Signed decimal with optional exponent
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((alt((char('e'), char('E'))), opt(char('-')), digit1))),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}
