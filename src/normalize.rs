//! Canonical records and the shape rules every backend's results follow.
//!
//! A normalized record lists the entity's canonical fields first, in
//! mapping order, followed by backend-specific extras sorted by name.
//! Fields a backend has no value for hold [`Value::NotApplicable`].

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};

use crate::envelope::ResultEnvelope;
use crate::schema::{FieldMapping, FieldType};
use crate::value::Value;

/// An ordered field-name to value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping its original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Normalizer output. `skipped` describes records that could not be decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<Record>,
    pub skipped: Vec<String>,
}

impl Normalized {
    pub fn records(records: Vec<Record>) -> Self {
        Self {
            records,
            skipped: vec![],
        }
    }
}

/// Decoded records are kept; failures become skip reasons.
impl FromIterator<Result<Record, String>> for Normalized {
    fn from_iter<I: IntoIterator<Item = Result<Record, String>>>(iter: I) -> Self {
        let mut out = Normalized::default();
        for item in iter {
            match item {
                Ok(record) => out.records.push(record),
                Err(reason) => out.skipped.push(reason),
            }
        }
        out
    }
}

/// Collects one raw record's canonical values and extras.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    canonical: BTreeMap<String, Value>,
    extras: BTreeMap<String, Value>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canonical(&mut self, field: &str, value: Value) {
        self.canonical.insert(field.to_string(), value);
    }

    pub fn extra(&mut self, field: &str, value: Value) {
        self.extras.insert(field.to_string(), value);
    }

    /// Fail when an identity field is absent, naming the record by `label`.
    pub fn check_identity(&self, mapping: &FieldMapping, label: &str) -> Result<(), String> {
        for field in &mapping.identity {
            match self.canonical.get(field) {
                None | Some(Value::Null) => {
                    return Err(format!("{} has no '{}'", label, field));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Canonical fields in mapping order, then extras alphabetically.
    pub fn build(mut self, mapping: &FieldMapping) -> Record {
        let mut record = Record::new();
        for binding in &mapping.fields {
            let value = self
                .canonical
                .remove(&binding.canonical)
                .unwrap_or(Value::NotApplicable);
            record.insert(binding.canonical.clone(), value);
        }
        for (k, v) in self.extras {
            if record.get(&k).is_none() {
                record.insert(k, v);
            }
        }
        record
    }
}

/// Coerce a raw value into the canonical type of a field.
///
/// Text lists may arrive as a list or as a `separator`-joined string;
/// numbers may arrive as text. Returns `None` when the value cannot be read
/// as the field's type.
pub fn coerce(value: Value, field_type: FieldType, separator: &str) -> Option<Value> {
    match (field_type, value) {
        (_, Value::Null) => Some(Value::Null),
        (FieldType::Text, Value::Text(s)) => Some(Value::Text(s)),
        (FieldType::Text, v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
            Some(Value::Text(v.to_string()))
        }
        (FieldType::Integer, Value::Int(i)) => Some(Value::Int(i)),
        (FieldType::Integer, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(f as i64)),
        (FieldType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
        (FieldType::Float, Value::Float(f)) => Some(Value::Float(f)),
        (FieldType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
        (FieldType::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
        (FieldType::TextList, Value::List(items)) => Some(Value::List(
            items
                .into_iter()
                .map(|v| match v {
                    Value::Text(s) => Value::Text(s),
                    other => Value::Text(other.to_string()),
                })
                .collect(),
        )),
        (FieldType::TextList, Value::Text(s)) => Some(Value::List(
            s.split(separator)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(Value::from)
                .collect(),
        )),
        _ => None,
    }
}

/// Give every record across all envelopes the same field set.
///
/// Missing fields are filled with the not-applicable marker; canonical
/// fields keep their leading position and extras stay alphabetical.
pub fn align(envelopes: Vec<ResultEnvelope>) -> Vec<ResultEnvelope> {
    if envelopes.iter().all(|e| e.records().is_empty()) {
        return envelopes;
    }
    let all_records = || envelopes.iter().flat_map(|e| e.records().iter());

    // Canonical fields form a prefix shared by every record.
    let mut leading: Vec<String> = all_records()
        .next()
        .map(|first| first.keys().map(String::from).collect())
        .unwrap_or_default();
    for record in all_records() {
        let shared = leading
            .iter()
            .zip(record.keys())
            .take_while(|(a, b)| a.as_str() == *b)
            .count();
        leading.truncate(shared);
    }
    let extras: BTreeSet<String> = all_records()
        .flat_map(|r| r.keys())
        .filter(|k| !leading.iter().any(|l| l == k))
        .map(String::from)
        .collect();

    envelopes
        .into_iter()
        .map(|envelope| {
            let records = envelope
                .records()
                .iter()
                .map(|record| {
                    leading
                        .iter()
                        .chain(extras.iter())
                        .map(|key| {
                            let value = record.get(key).cloned().unwrap_or(Value::NotApplicable);
                            (key.clone(), value)
                        })
                        .collect()
                })
                .collect();
            envelope.with_records(records)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::schema::movie_mapping;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_builder_orders_and_fills() {
        let mapping = movie_mapping(BackendKind::Document);
        let mut builder = RecordBuilder::new();
        builder.extra("plot", Value::from("..."));
        builder.extra("_id", Value::Int(7));
        builder.canonical("year", Value::Int(1990));
        builder.canonical("title", Value::from("Ghost"));
        let record = builder.build(&mapping);

        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(
            keys,
            vec!["title", "year", "genre", "director", "cast", "rating", "_id", "plot"]
        );
        assert_eq!(record.get("rating"), Some(&Value::NotApplicable));
    }

    #[test]
    fn test_identity_check() {
        let mapping = movie_mapping(BackendKind::Document);
        let mut builder = RecordBuilder::new();
        builder.canonical("title", Value::from("Ghost"));
        assert!(builder.check_identity(&mapping, "doc 1").is_err());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            coerce(Value::from("Drama, War"), FieldType::TextList, ","),
            Some(Value::from(vec!["Drama", "War"]))
        );
        assert_eq!(coerce(Value::from("1990"), FieldType::Integer, ","), Some(Value::Int(1990)));
        assert_eq!(coerce(Value::from("n/a"), FieldType::Float, ","), None);
    }

    #[test]
    fn test_align_fills_missing_extras() {
        let a: Record = vec![
            ("title".to_string(), Value::from("Ghost")),
            ("_id".to_string(), Value::Int(1)),
        ]
        .into_iter()
        .collect();
        let b: Record = vec![
            ("title".to_string(), Value::from("Ghost")),
            ("row_key".to_string(), Value::from("movie_Ghost!e1990")),
        ]
        .into_iter()
        .collect();

        let envelopes = align(vec![
            ResultEnvelope::success(BackendKind::Document, vec![a], None, String::new(), Duration::ZERO),
            ResultEnvelope::success(BackendKind::WideColumn, vec![b], None, String::new(), Duration::ZERO),
        ]);

        for envelope in &envelopes {
            let keys: Vec<&str> = envelope.records()[0].keys().collect();
            assert_eq!(keys, vec!["title", "_id", "row_key"]);
        }
        assert_eq!(envelopes[0].records()[0].get("row_key"), Some(&Value::NotApplicable));
    }
}
