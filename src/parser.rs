//! Compact intent syntax, parsed with nom.
//!
//! # Syntax Overview
//!
//! ```text
//! get::movies[year=1993, director~'spielberg'i][lim=10]
//! ─┬─ ──┬───  ──────────────┬─────────────────  ──┬───
//!  │    │                   │                      └── Pagination cage
//!  │    │                   └── Condition cage (AND-combined)
//!  │    └── Entity
//!  └── Gate (operation)
//! ```
//!
//! Gates: `get` (filter), `key` (read-by-key), `add` (create), `set`
//! (update), `del` (delete), `schema` (describe-schema). For `set`, the
//! first cage holds the assignments; for `add`, every cage is payload.
//! A quoted string followed by `i` matches case-insensitively, and
//! `field={a, b}` is an in-set test.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator, Predicate};
use crate::value::Value;

/// Parse a complete intent string.
pub fn parse(input: &str) -> EngineResult<Intent> {
    let input = input.trim();

    let (op, entity, cages) = match parse_command(input) {
        Ok(("", parsed)) => parsed,
        Ok((remaining, _)) => {
            let position = input.len() - remaining.len();
            if remaining.contains('|') {
                return Err(EngineError::parse(
                    position,
                    "OR-combined predicates are not supported; predicates are always AND-combined",
                ));
            }
            return Err(EngineError::parse(
                position,
                format!("Unexpected trailing content: '{}'", remaining),
            ));
        }
        Err(nom::Err::Failure(e)) if e.code == nom::error::ErrorKind::TooLarge => {
            let position = input.len() - e.input.len();
            let number: String = e.input.chars().take_while(|c| c.is_ascii_digit() || *c == '-').collect();
            return Err(EngineError::parse(position, format!("number '{}' is out of range", number)));
        }
        Err(e) => return Err(EngineError::parse(0, format!("Parse failed: {:?}", e))),
    };

    assemble(op, entity, cages)
}

#[derive(Debug, Clone, PartialEq)]
enum Cage {
    Conditions(Vec<Condition>),
    Limit(u64),
    Offset(u64),
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    field: String,
    operator: Operator,
    value: Value,
    fold: bool,
}

/// Turn parsed cages into an intent according to the gate.
fn assemble(operation: Operation, entity: &str, cages: Vec<Cage>) -> EngineResult<Intent> {
    let mut intent = Intent::new(operation, entity);
    let mut seen_assignments = false;

    for cage in cages {
        match cage {
            Cage::Limit(n) => intent.pagination.limit = Some(n),
            Cage::Offset(n) => intent.pagination.offset = Some(n),
            Cage::Conditions(conditions) => match operation {
                Operation::Create => assign(&mut intent.payload, conditions)?,
                Operation::Update if !seen_assignments => {
                    seen_assignments = true;
                    assign(&mut intent.updates, conditions)?;
                }
                Operation::DescribeSchema => {
                    return Err(EngineError::parse(0, "schema takes no conditions"));
                }
                _ => intent.predicates.extend(conditions.into_iter().map(|c| Predicate {
                    field: c.field,
                    operator: c.operator,
                    value: c.value,
                    case_insensitive: c.fold,
                })),
            },
        }
    }

    Ok(intent)
}

fn assign(target: &mut BTreeMap<String, Value>, conditions: Vec<Condition>) -> EngineResult<()> {
    for c in conditions {
        // `genre={'Drama','War'}` parses as in-set; in an assignment it is a list value.
        if !matches!(c.operator, Operator::Equals | Operator::InSet) {
            return Err(EngineError::parse(
                0,
                format!("assignment to '{}' must use '='", c.field),
            ));
        }
        target.insert(c.field, c.value);
    }
    Ok(())
}

fn parse_command(input: &str) -> IResult<&str, (Operation, &str, Vec<Cage>)> {
    let (input, op) = parse_gate(input)?;
    let (input, _) = tag("::")(input)?;
    let (input, entity) = parse_identifier(input)?;
    let (input, cages) = many0(preceded(multispace0, parse_cage))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (op, entity, cages)))
}

/// Parse the gate (get, key, add, set, del, schema).
fn parse_gate(input: &str) -> IResult<&str, Operation> {
    alt((
        value(Operation::Filter, tag("get")),
        value(Operation::ReadByKey, tag("key")),
        value(Operation::Create, tag("add")),
        value(Operation::DescribeSchema, tag("schema")),
        value(Operation::Update, tag("set")),
        value(Operation::Delete, tag("del")),
    ))(input)
}

/// Parse an identifier (entity, field name).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// Parse a single cage [...].
fn parse_cage(input: &str) -> IResult<&str, Cage> {
    let (input, _) = char('[')(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((remaining, cage)) = parse_page_cage(input) {
        let (remaining, _) = multispace0(remaining)?;
        let (remaining, _) = char(']')(remaining)?;
        return Ok((remaining, cage));
    }

    let (input, conditions) = separated_list1(
        delimited(multispace0, alt((char(','), char('&'))), multispace0),
        parse_condition,
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(']')(input)?;

    Ok((input, Cage::Conditions(conditions)))
}

/// Parse [lim=N] or [off=N].
fn parse_page_cage(input: &str) -> IResult<&str, Cage> {
    let (input, which) = alt((tag("lim"), tag("off")))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = multispace0(input)?;
    let (rest, n) = digit1(input)?;
    let n: u64 = n.parse().map_err(|_| too_large(input))?;
    let input = rest;

    let cage = if which == "lim" { Cage::Limit(n) } else { Cage::Offset(n) };
    Ok((input, cage))
}

/// Parse a single condition.
fn parse_condition(input: &str) -> IResult<&str, Condition> {
    let (input, field) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operator) = alt((
        value(Operator::Contains, char('~')),
        value(Operator::GreaterThan, char('>')),
        value(Operator::LessThan, char('<')),
        value(Operator::Equals, char('=')),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, (value, fold)) = alt((parse_set, parse_scalar))(input)?;

    let operator = match (&operator, &value) {
        (Operator::Equals, Value::List(_)) => Operator::InSet,
        _ => operator,
    };

    Ok((
        input,
        Condition {
            field: field.to_string(),
            operator,
            value,
            fold,
        },
    ))
}

/// Parse a set literal `{a, b}` with an optional case-folding suffix.
fn parse_set(input: &str) -> IResult<&str, (Value, bool)> {
    let (input, items) = delimited(
        pair(char('{'), multispace0),
        separated_list1(
            delimited(multispace0, char(','), multispace0),
            map(parse_scalar, |(v, _)| v),
        ),
        pair(multispace0, char('}')),
    )(input)?;
    let (input, fold) = opt(char('i'))(input)?;
    Ok((input, (Value::List(items), fold.is_some())))
}

/// Parse a scalar value; quoted strings may carry an `i` suffix.
fn parse_scalar(input: &str) -> IResult<&str, (Value, bool)> {
    alt((
        pair(parse_quoted_string, map(opt(char('i')), |f| f.is_some())),
        map(parse_number, |v| (v, false)),
        map(parse_identifier, |s| (bare_word(s), false)),
    ))(input)
}

fn bare_word(word: &str) -> Value {
    match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        other => Value::Text(other.to_string()),
    }
}

fn too_large(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::TooLarge))
}

/// Parse a number (integer or float).
fn parse_number(input: &str) -> IResult<&str, Value> {
    let start = input;
    let (input, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    // A digit run glued to letters is a bare word, not a number.
    if input.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        )));
    }

    let value = if num_str.contains('.') {
        Value::Float(num_str.parse().map_err(|_| too_large(start))?)
    } else {
        Value::Int(num_str.parse().map_err(|_| too_large(start))?)
    };
    Ok((input, value))
}

/// Parse a quoted string. A quote inside is written `''` or `\'`, a backslash `\\`.
fn parse_quoted_string(input: &str) -> IResult<&str, Value> {
    let (mut rest, _) = char('\'')(input)?;
    let mut content = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('\'') if chars.as_str().starts_with('\'') => {
                content.push('\'');
                rest = &rest[2..];
            }
            Some('\'') => return Ok((&rest[1..], Value::Text(content))),
            Some('\\') => match chars.next() {
                Some(c @ ('\'' | '\\')) => {
                    content.push(c);
                    rest = &rest[2..];
                }
                _ => {
                    content.push('\\');
                    rest = &rest[1..];
                }
            },
            Some(c) => {
                content.push(c);
                rest = &rest[c.len_utf8()..];
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_simple_get() {
        let intent = parse("get::movies").unwrap();
        assert_eq!(intent.operation, Operation::Filter);
        assert_eq!(intent.entity, "movies");
        assert!(intent.predicates.is_empty());
    }

    #[test]
    fn test_get_with_filter() {
        let intent = parse("get::movies[year=1990]").unwrap();
        assert_eq!(intent.predicates.len(), 1);
        assert_eq!(intent.predicates[0].field, "year");
        assert_eq!(intent.predicates[0].operator, Operator::Equals);
        assert_eq!(intent.predicates[0].value, Value::Int(1990));
    }

    #[test]
    fn test_case_insensitive_contains() {
        let intent = parse("get::movies[year=1993, director~'spielberg'i]").unwrap();
        assert_eq!(intent.predicates.len(), 2);
        let director = &intent.predicates[1];
        assert_eq!(director.operator, Operator::Contains);
        assert_eq!(director.value, Value::from("spielberg"));
        assert!(director.case_insensitive);
    }

    #[test]
    fn test_ampersand_joins_conditions() {
        let intent = parse("get::movies[rating>8.5 & year<2000]").unwrap();
        assert_eq!(intent.predicates[0].operator, Operator::GreaterThan);
        assert_eq!(intent.predicates[0].value, Value::Float(8.5));
        assert_eq!(intent.predicates[1].operator, Operator::LessThan);
    }

    #[test]
    fn test_in_set() {
        let intent = parse("get::movies[genre={'Drama', 'War'}i]").unwrap();
        assert_eq!(intent.predicates[0].operator, Operator::InSet);
        assert_eq!(intent.predicates[0].value, Value::from(vec!["Drama", "War"]));
        assert!(intent.predicates[0].case_insensitive);
    }

    #[test]
    fn test_limit_and_offset() {
        let intent = parse("get::movies[year>1989][lim=10][off=20]").unwrap();
        assert_eq!(intent.pagination.limit, Some(10));
        assert_eq!(intent.pagination.offset, Some(20));
    }

    #[test]
    fn test_set_command() {
        let intent = parse("set::movies[rating=9.1][title='Inception', year=2010]").unwrap();
        assert_eq!(intent.operation, Operation::Update);
        assert_eq!(intent.updates.get("rating"), Some(&Value::Float(9.1)));
        assert_eq!(intent.predicates.len(), 2);
    }

    #[test]
    fn test_add_command() {
        let intent =
            parse("add::movies[title='Inception', year=2010, genre={'Action','Sci-Fi'}]").unwrap();
        assert_eq!(intent.operation, Operation::Create);
        assert_eq!(intent.payload.len(), 3);
        assert_eq!(intent.payload["genre"], Value::from(vec!["Action", "Sci-Fi"]));
    }

    #[test]
    fn test_key_del_schema() {
        assert_eq!(parse("key::movies[title='Hook', year=1991]").unwrap().operation, Operation::ReadByKey);
        assert_eq!(parse("del::movies[title='Hook']").unwrap().operation, Operation::Delete);
        assert_eq!(parse("schema::movies").unwrap().operation, Operation::DescribeSchema);
    }

    #[test]
    fn test_or_rejected() {
        let err = parse("get::movies[year=1990 | year=1991]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIntent);
        assert!(err.to_string().contains("OR-combined"));
    }

    #[test]
    fn test_add_rejects_comparison() {
        assert!(parse("add::movies[year>2000]").is_err());
    }

    #[test]
    fn test_quote_inside_string() {
        for text in ["key::movies[title='Schindler''s List', year=1993]", r"key::movies[title='Schindler\'s List', year=1993]"] {
            let intent = parse(text).unwrap();
            assert_eq!(intent.predicates[0].value, Value::from("Schindler's List"), "{}", text);
            assert_eq!(intent.predicates[1].value, Value::Int(1993));
        }

        let intent = parse(r"get::movies[title='a\\b', genre={'Rock''n''Roll', 'Pop'}]").unwrap();
        assert_eq!(intent.predicates[0].value, Value::from(r"a\b"));
        assert_eq!(intent.predicates[1].value, Value::from(vec!["Rock'n'Roll", "Pop"]));

        assert!(parse("get::movies[title='unterminated]").is_err());
    }

    #[test]
    fn test_out_of_range_numbers_rejected() {
        let err = parse("get::movies[year=99999999999999999999]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIntent);
        assert!(err.to_string().contains("out of range"), "{}", err);

        assert!(parse("get::movies[lim=99999999999999999999]").is_err());
        assert_eq!(parse("get::movies[year=-5]").unwrap().predicates[0].value, Value::Int(-5));
    }

    #[test]
    fn test_bare_words() {
        let intent = parse("get::movies[title=Ghost]").unwrap();
        assert_eq!(intent.predicates[0].value, Value::from("Ghost"));
    }
}
