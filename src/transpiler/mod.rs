//! Intent translators, one per database family.
//!
//! Each family has a `To<Dialect>` trait implemented for [`Intent`] that
//! produces a structured native query; `Display` on that query renders the
//! text a human would paste into the database's own shell.
//!
//! Every translator starts from a [`Plan`], which binds canonical fields to
//! the backend's mapping and runs the type checks shared by all families.
//! The same intent therefore fails the same way everywhere.

pub mod document;
pub mod graph;
pub mod keyvalue;
pub mod triple;
pub mod widecolumn;

use std::fmt;

use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator, Pagination};
use crate::schema::{FieldBinding, FieldMapping, FieldType};
use crate::value::Value;

pub use document::{DocumentQuery, ToDocument};
pub use graph::{GraphQuery, ToCypher};
pub use keyvalue::{KeyValueQuery, ToRediSearch};
pub use triple::{ToSparql, TripleQuery};
pub use widecolumn::{ToHBase, WideColumnQuery};

/// A translated query for one backend family.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    Document(DocumentQuery),
    Graph(GraphQuery),
    KeyValue(KeyValueQuery),
    WideColumn(WideColumnQuery),
    Triple(TripleQuery),
}

impl NativeQuery {
    pub fn backend(&self) -> BackendKind {
        match self {
            NativeQuery::Document(_) => BackendKind::Document,
            NativeQuery::Graph(_) => BackendKind::Graph,
            NativeQuery::KeyValue(_) => BackendKind::KeyValue,
            NativeQuery::WideColumn(_) => BackendKind::WideColumn,
            NativeQuery::Triple(_) => BackendKind::Triple,
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeQuery::Document(q) => q.fmt(f),
            NativeQuery::Graph(q) => q.fmt(f),
            NativeQuery::KeyValue(q) => q.fmt(f),
            NativeQuery::WideColumn(q) => q.fmt(f),
            NativeQuery::Triple(q) => q.fmt(f),
        }
    }
}

/// Translate for any family.
pub fn translate(kind: BackendKind, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
    Ok(match kind {
        BackendKind::Document => NativeQuery::Document(intent.to_document(mapping)?),
        BackendKind::Graph => NativeQuery::Graph(intent.to_cypher(mapping)?),
        BackendKind::KeyValue => NativeQuery::KeyValue(intent.to_redisearch(mapping)?),
        BackendKind::WideColumn => NativeQuery::WideColumn(intent.to_hbase(mapping)?),
        BackendKind::Triple => NativeQuery::Triple(intent.to_sparql(mapping)?),
    })
}

/// A predicate bound to its field.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bound<'a> {
    pub binding: &'a FieldBinding,
    pub operator: Operator,
    pub value: &'a Value,
    pub fold: bool,
}

impl<'a> Bound<'a> {
    pub fn native(&self) -> &'a str {
        &self.binding.native
    }

    pub fn is_list_field(&self) -> bool {
        self.binding.field_type == FieldType::TextList
    }

    /// The operand values: the set members for in-set, else the one value.
    pub fn operands(&self) -> Vec<&'a Value> {
        self.value.elements()
    }
}

/// A field assignment with its value coerced to the field's type.
#[derive(Debug, Clone)]
pub(crate) struct Assignment<'a> {
    pub binding: &'a FieldBinding,
    pub value: Value,
}

impl Assignment<'_> {
    pub fn native(&self) -> &str {
        &self.binding.native
    }
}

/// Validated, type-checked view of an intent against one mapping.
#[derive(Debug, Clone)]
pub(crate) struct Plan<'a> {
    pub operation: Operation,
    pub mapping: &'a FieldMapping,
    pub predicates: Vec<Bound<'a>>,
    /// Payload for create, updates for update.
    pub assignments: Vec<Assignment<'a>>,
    pub pagination: Pagination,
}

impl<'a> Plan<'a> {
    pub fn new(intent: &'a Intent, mapping: &'a FieldMapping) -> EngineResult<Self> {
        intent.validate()?;

        let mut predicates = Vec::with_capacity(intent.predicates.len());
        for p in &intent.predicates {
            let binding = mapping.require(&p.field)?;
            let bound = Bound {
                binding,
                operator: p.operator,
                value: &p.value,
                fold: p.case_insensitive,
            };
            check_predicate(&bound)?;
            predicates.push(bound);
        }

        let source = match intent.operation {
            Operation::Create => Some(&intent.payload),
            Operation::Update => Some(&intent.updates),
            _ => None,
        };
        let mut assignments = Vec::new();
        for (field, value) in source.into_iter().flatten() {
            let binding = mapping.require(field)?;
            assignments.push(Assignment {
                binding,
                value: coerce_assignment(binding, value)?,
            });
        }
        // Canonical order keeps rendered queries stable.
        assignments.sort_by_key(|a| mapping.fields.iter().position(|b| b.canonical == a.binding.canonical));

        let plan = Self {
            operation: intent.operation,
            mapping,
            predicates,
            assignments,
            pagination: intent.pagination,
        };
        intent.validate_identity(&mapping.identity)?;
        Ok(plan)
    }

    /// Equality predicates on each identity field, in identity order.
    fn identity_predicates(&self) -> EngineResult<Vec<Bound<'a>>> {
        self.mapping
            .identity
            .iter()
            .map(|field| {
                self.predicates
                    .iter()
                    .find(|p| &p.binding.canonical == field && p.operator == Operator::Equals)
                    .copied()
                    .ok_or_else(|| {
                        EngineError::malformed(format!(
                            "{} needs an equality predicate on every identity field ({})",
                            self.operation,
                            self.mapping.identity.join(", ")
                        ))
                    })
            })
            .collect()
    }

    /// Identity values, from the payload for create or the equality predicates otherwise.
    pub fn identity(&self) -> EngineResult<Vec<Value>> {
        if self.operation == Operation::Create {
            return Ok(self
                .mapping
                .identity
                .iter()
                .filter_map(|field| {
                    self.assignments
                        .iter()
                        .find(|a| &a.binding.canonical == field)
                        .map(|a| a.value.clone())
                })
                .collect());
        }
        // Keys are built from stored types, so `year=1991.0` finds `1991`.
        self.identity_predicates()?
            .into_iter()
            .map(|p| coerce_assignment(p.binding, p.value))
            .collect()
    }

    /// Identity values joined into a key suffix, e.g. `Inception!e2010`.
    ///
    /// Suffixes of distinct identities differ, and byte order of suffixes
    /// follows the order of the identity tuples.
    pub fn key_suffix(&self) -> EngineResult<String> {
        let parts: Vec<String> = self.identity()?.iter().map(key_fragment).collect();
        Ok(parts.join(KEY_SEPARATOR))
    }

    /// Native names of the identity fields, for ordering results.
    pub fn identity_natives(&self) -> Vec<&'a str> {
        self.mapping
            .identity_bindings()
            .map(|b| b.native.as_str())
            .collect()
    }
}

fn check_predicate(bound: &Bound) -> EngineResult<()> {
    let field = &bound.binding.canonical;
    let field_type = bound.binding.field_type;

    match bound.operator {
        Operator::Contains if !field_type.is_text() => {
            return Err(EngineError::invalid_predicate(
                field,
                format!("contains needs a text field, '{}' is {}", field, field_type),
            ));
        }
        Operator::GreaterThan | Operator::LessThan if !field_type.is_numeric() => {
            return Err(EngineError::invalid_predicate(
                field,
                format!(
                    "'{}' needs a numeric field, '{}' is {}",
                    bound.operator.symbol(),
                    field,
                    field_type
                ),
            ));
        }
        _ => {}
    }

    if bound.fold && !field_type.is_text() {
        return Err(EngineError::invalid_predicate(
            field,
            format!("case-insensitive matching needs a text field, '{}' is {}", field, field_type),
        ));
    }

    for value in bound.operands() {
        if !field_type.accepts(value) {
            return Err(EngineError::invalid_predicate(
                field,
                format!("{} value '{}' does not fit {} field '{}'", value.type_name(), value, field_type, field),
            ));
        }
    }
    Ok(())
}

fn coerce_assignment(binding: &FieldBinding, value: &Value) -> EngineResult<Value> {
    let mismatch = || {
        EngineError::invalid_predicate(
            &binding.canonical,
            format!(
                "{} value '{}' cannot be stored in {} field '{}'",
                value.type_name(),
                value,
                binding.field_type,
                binding.canonical
            ),
        )
    };

    match (binding.field_type, value) {
        (FieldType::Text, Value::Text(_)) => Ok(value.clone()),
        (FieldType::Integer, Value::Int(_)) => Ok(value.clone()),
        (FieldType::Integer, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(*f as i64)),
        (FieldType::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (FieldType::Float, Value::Float(_)) => Ok(value.clone()),
        (FieldType::TextList, Value::Text(_)) => Ok(Value::List(vec![value.clone()])),
        (FieldType::TextList, Value::List(items)) if items.iter().all(|v| v.as_str().is_some()) => {
            Ok(value.clone())
        }
        _ => Err(mismatch()),
    }
}

/// Separator between identity fragments in a key; sorts below any fragment byte.
pub const KEY_SEPARATOR: &str = "!";

/// Order-preserving key fragment for one identity value.
///
/// Text keeps every char from `0` upward and writes the rest as `%XX`,
/// which sorts below the kept chars in the same order as the originals.
/// Integers get a length prefix so they sort numerically: `a`.. for
/// non-negative values, `Z`.. with nines-complemented digits for negative.
pub(crate) fn key_fragment(value: &Value) -> String {
    match value {
        Value::Int(i) => {
            let digits = i.unsigned_abs().to_string();
            let len = digits.len() as u8;
            if *i >= 0 {
                format!("{}{}", (b'a' + len) as char, digits)
            } else {
                let complement: String = digits
                    .bytes()
                    .map(|d| (b'9' - (d - b'0')) as char)
                    .collect();
                format!("{}{}", (b'Z' - len) as char, complement)
            }
        }
        other => {
            let text = other.to_string();
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                if c < '0' {
                    out.push_str(&format!("%{:02X}", c as u32));
                } else {
                    out.push(c);
                }
            }
            out
        }
    }
}
