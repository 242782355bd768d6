//! Key-value translation (Redis hashes searched through RediSearch).
//!
//! Each entity is a hash under `<prefix><identity key>`. Text and list
//! fields are TAG attributes; list fields are declared with `SEPARATOR ,`
//! and scalar text fields with no separator, so a comma in a title is
//! part of the tag. TAG matching is case-sensitive, so every text field
//! also gets a lowercased `<field>_lc` shadow that case-insensitive
//! predicates search instead. Substring matching uses infix wildcards and
//! is only offered on the shadows.
//!
//! Reads go through `FT.AGGREGATE` so results can be sorted on every
//! identity field; `FT.SEARCH` only takes one `SORTBY` key.

use std::fmt;

use super::{Assignment, Bound, Plan};
use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator};
use crate::schema::{FieldMapping, FieldType};
use crate::value::Value;

/// Separator for list fields stored in a single hash field.
pub const LIST_SEPARATOR: &str = ",";

/// Suffix of the lowercased shadow of a text field.
pub const SHADOW_SUFFIX: &str = "_lc";

/// RediSearch returns 10 documents unless told otherwise.
pub const DEFAULT_LIMIT: u64 = 10_000;

pub trait ToRediSearch {
    fn to_redisearch(&self, mapping: &FieldMapping) -> EngineResult<KeyValueQuery>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueQuery {
    pub index: String,
    /// Key prefix the index covers, e.g. `movies:`.
    pub prefix: String,
    pub command: KeyValueCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyValueCommand {
    Search {
        clauses: Vec<Clause>,
        fields: Vec<String>,
        sort_by: Vec<SortKey>,
        offset: u64,
        limit: u64,
    },
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Search, then HSET every matching key.
    SetMatching {
        clauses: Vec<Clause>,
        fields: Vec<(String, String)>,
    },
    /// Search, then DEL every matching key.
    DeleteMatching { clauses: Vec<Clause> },
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Matches when the field falls in any of the ranges.
    Numeric { field: String, ranges: Vec<(RangeBound, RangeBound)> },
    /// Matches when the tag matches any pattern. A `list` field holds
    /// several tags joined with [`LIST_SEPARATOR`], any of which may match.
    Tag {
        field: String,
        patterns: Vec<TagPattern>,
        list: bool,
    },
}

/// A `SORTBY` property; numeric properties sort by value, the rest bytewise.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub numeric: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBound {
    Inclusive(f64),
    Exclusive(f64),
    Unbounded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagPattern {
    Exact(String),
    Infix(String),
}

impl KeyValueQuery {
    /// The key pattern the search scans.
    pub fn key_pattern(&self) -> String {
        format!("{}*", self.prefix)
    }
}

impl ToRediSearch for Intent {
    fn to_redisearch(&self, mapping: &FieldMapping) -> EngineResult<KeyValueQuery> {
        let plan = Plan::new(self, mapping)?;
        let index = mapping.native_entity.clone();
        let prefix = format!("{}:", index.strip_prefix("idx:").unwrap_or(&index));

        let command = match plan.operation {
            Operation::Filter | Operation::ReadByKey => KeyValueCommand::Search {
                clauses: build_clauses(&plan.predicates)?,
                fields: mapping.fields.iter().map(|b| b.native.clone()).collect(),
                sort_by: mapping
                    .identity_bindings()
                    .map(|b| SortKey {
                        field: b.native.clone(),
                        numeric: b.field_type.is_numeric(),
                    })
                    .collect(),
                offset: plan.pagination.offset.unwrap_or(0),
                limit: plan.pagination.limit.unwrap_or(DEFAULT_LIMIT),
            },
            Operation::Create => KeyValueCommand::HashSet {
                key: format!("{}{}", prefix, plan.key_suffix()?),
                fields: encode_assignments(&plan.assignments),
            },
            Operation::Update => KeyValueCommand::SetMatching {
                clauses: build_clauses(&plan.predicates)?,
                fields: encode_assignments(&plan.assignments),
            },
            Operation::Delete => KeyValueCommand::DeleteMatching {
                clauses: build_clauses(&plan.predicates)?,
            },
            Operation::DescribeSchema => KeyValueCommand::Info,
        };

        Ok(KeyValueQuery { index, prefix, command })
    }
}

fn build_clauses(predicates: &[Bound]) -> EngineResult<Vec<Clause>> {
    predicates.iter().map(clause).collect()
}

fn clause(p: &Bound) -> EngineResult<Clause> {
    if p.binding.field_type.is_numeric() {
        let ranges = match p.operator {
            Operator::GreaterThan => vec![(exclusive(p.value), RangeBound::Unbounded)],
            Operator::LessThan => vec![(RangeBound::Unbounded, exclusive(p.value))],
            _ => p
                .operands()
                .into_iter()
                .map(|v| (inclusive(v), inclusive(v)))
                .collect(),
        };
        return Ok(Clause::Numeric {
            field: p.native().to_string(),
            ranges,
        });
    }

    let (field, fold) = if p.fold {
        (format!("{}{}", p.native(), SHADOW_SUFFIX), true)
    } else {
        (p.native().to_string(), false)
    };
    let text = |v: &Value| {
        let s = v.to_string();
        if fold { s.to_lowercase() } else { s }
    };

    let patterns = match p.operator {
        Operator::Contains if !fold => {
            return Err(EngineError::unsupported(
                BackendKind::KeyValue,
                format!(
                    "case-sensitive substring match on '{}'; TAG fields only support infix search on their lowercased shadow",
                    p.binding.canonical
                ),
            ));
        }
        Operator::Contains => vec![TagPattern::Infix(text(p.value))],
        _ => p
            .operands()
            .into_iter()
            .map(|v| TagPattern::Exact(text(v)))
            .collect(),
    };
    Ok(Clause::Tag {
        field,
        patterns,
        list: p.is_list_field(),
    })
}

fn inclusive(v: &Value) -> RangeBound {
    RangeBound::Inclusive(v.as_f64().unwrap_or_default())
}

fn exclusive(v: &Value) -> RangeBound {
    RangeBound::Exclusive(v.as_f64().unwrap_or_default())
}

/// Hash fields for assignments, shadows included.
fn encode_assignments(assignments: &[Assignment]) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for a in assignments {
        let encoded = encode(&a.value);
        if a.binding.field_type.is_text() {
            fields.push((format!("{}{}", a.native(), SHADOW_SUFFIX), encoded.to_lowercase()));
        }
        fields.push((a.native().to_string(), encoded));
    }
    fields.sort();
    fields
}

/// Hash encoding of a canonical value.
pub fn encode(value: &Value) -> String {
    match value {
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            parts.join(LIST_SEPARATOR)
        }
        other => other.to_string(),
    }
}

/// Whether a stored hash field is a case-folding shadow of a mapped text field.
pub fn is_shadow(mapping: &FieldMapping, field: &str) -> bool {
    field.strip_suffix(SHADOW_SUFFIX).is_some_and(|base| {
        mapping
            .by_native(base)
            .is_some_and(|b| b.field_type == FieldType::Text || b.field_type == FieldType::TextList)
    })
}

fn escape_tag(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_whitespace() || ",.<>{}[]\"':;!@#$%^&*()-+=~|/\\".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote_arg(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) || s.contains('"') {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Inclusive(v) => write!(f, "{}", v),
            RangeBound::Exclusive(v) => write!(f, "({}", v),
            RangeBound::Unbounded => Ok(()),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Numeric { field, ranges } => {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|(lo, hi)| {
                        let lo = match lo {
                            RangeBound::Unbounded => "-inf".to_string(),
                            b => b.to_string(),
                        };
                        let hi = match hi {
                            RangeBound::Unbounded => "+inf".to_string(),
                            b => b.to_string(),
                        };
                        format!("@{}:[{} {}]", field, lo, hi)
                    })
                    .collect();
                if parts.len() == 1 {
                    write!(f, "{}", parts[0])
                } else {
                    write!(f, "({})", parts.join(" | "))
                }
            }
            Clause::Tag { field, patterns, .. } => {
                let parts: Vec<String> = patterns
                    .iter()
                    .map(|p| match p {
                        TagPattern::Exact(s) => escape_tag(s),
                        TagPattern::Infix(s) => format!("*{}*", escape_tag(s)),
                    })
                    .collect();
                write!(f, "@{}:{{{}}}", field, parts.join(" | "))
            }
        }
    }
}

fn render_query(clauses: &[Clause]) -> String {
    if clauses.is_empty() {
        return "*".to_string();
    }
    let parts: Vec<String> = clauses.iter().map(|c| c.to_string()).collect();
    parts.join(" ")
}

fn render_fields(fields: &[(String, String)]) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{} {}", k, quote_arg(v)))
        .collect();
    parts.join(" ")
}

impl fmt::Display for KeyValueQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            KeyValueCommand::Search {
                clauses,
                fields,
                sort_by,
                offset,
                limit,
            } => {
                write!(f, "FT.AGGREGATE {} \"{}\"", self.index, render_query(clauses))?;
                let mut load = vec!["@__key".to_string()];
                load.extend(fields.iter().map(|n| format!("@{}", n)));
                write!(f, " LOAD {} {}", load.len(), load.join(" "))?;
                if !sort_by.is_empty() {
                    let keys: Vec<String> = sort_by.iter().map(|k| format!("@{} ASC", k.field)).collect();
                    write!(f, " SORTBY {} {}", keys.len() * 2, keys.join(" "))?;
                }
                write!(f, " LIMIT {} {}", offset, limit)
            }
            KeyValueCommand::HashSet { key, fields } => {
                write!(f, "HSET {} {}", key, render_fields(fields))
            }
            KeyValueCommand::SetMatching { clauses, fields } => write!(
                f,
                "FT.SEARCH {} \"{}\" NOCONTENT LIMIT 0 {}\nHSET <key> {}",
                self.index,
                render_query(clauses),
                DEFAULT_LIMIT,
                render_fields(fields)
            ),
            KeyValueCommand::DeleteMatching { clauses } => write!(
                f,
                "FT.SEARCH {} \"{}\" NOCONTENT LIMIT 0 {}\nDEL <key>",
                self.index,
                render_query(clauses),
                DEFAULT_LIMIT
            ),
            KeyValueCommand::Info => write!(f, "FT.INFO {}", self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::movie_mapping;

    fn translate(intent: Intent) -> EngineResult<KeyValueQuery> {
        intent.to_redisearch(&movie_mapping(BackendKind::KeyValue))
    }

    #[test]
    fn test_search() {
        let query = translate(
            Intent::filter("movies")
                .eq("year", 1993)
                .contains_ci("director", "Spielberg")
                .limit(10),
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            "FT.AGGREGATE idx:movies \"@year:[1993 1993] @director_lc:{*spielberg*}\" \
             LOAD 7 @__key @title @year @genre @director @cast @rating \
             SORTBY 4 @title ASC @year ASC LIMIT 0 10"
        );
        assert_eq!(query.key_pattern(), "movies:*");
    }

    #[test]
    fn test_ranges() {
        let query = translate(Intent::filter("movies").gt("rating", 8.5).lt("year", 2000)).unwrap();
        assert!(query.to_string().contains("\"@rating:[(8.5 +inf] @year:[-inf (2000]\""));
    }

    #[test]
    fn test_tag_escaping_and_sets() {
        let query = translate(Intent::filter("movies").in_set("genre", vec!["Sci-Fi", "War"])).unwrap();
        assert!(query.to_string().contains("@genre:{Sci\\-Fi | War}"));

        let query = translate(Intent::filter("movies").eq("title", "Home Alone")).unwrap();
        assert!(query.to_string().contains("@title:{Home\\ Alone}"));
    }

    #[test]
    fn test_only_list_tags_split() {
        let query = translate(Intent::filter("movies").eq("title", "Crouching Tiger, Hidden Dragon")).unwrap();
        let KeyValueCommand::Search { clauses, .. } = &query.command else {
            panic!("expected a search");
        };
        assert!(matches!(&clauses[0], Clause::Tag { list: false, .. }));
        assert!(query.to_string().contains("@title:{Crouching\\ Tiger\\,\\ Hidden\\ Dragon}"));

        let query = translate(Intent::filter("movies").eq("genre", "Drama")).unwrap();
        let KeyValueCommand::Search { clauses, .. } = &query.command else {
            panic!("expected a search");
        };
        assert!(matches!(&clauses[0], Clause::Tag { list: true, .. }));
    }

    #[test]
    fn test_case_sensitive_contains_unsupported() {
        let err = translate(Intent::filter("movies").contains("title", "Park")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_hset_writes_shadows() {
        let query = translate(
            Intent::create("movies")
                .value("title", "Inception")
                .value("year", 2010)
                .value("director", "Christopher Nolan"),
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            "HSET movies:Inception!e2010 director \"Christopher Nolan\" director_lc \"christopher nolan\" \
             title Inception title_lc inception year 2010"
        );
    }

    #[test]
    fn test_shadow_detection() {
        let mapping = movie_mapping(BackendKind::KeyValue);
        assert!(is_shadow(&mapping, "title_lc"));
        assert!(!is_shadow(&mapping, "year_lc"));
        assert!(!is_shadow(&mapping, "title"));
    }
}
