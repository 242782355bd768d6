//! Backend adapters.
//!
//! An adapter owns a client for one database family and knows three
//! things: how to translate an intent for that family, how to execute the
//! translated query through its client, and how to normalize what comes
//! back into canonical records.

pub mod document;
pub mod graph;
pub mod keyvalue;
pub mod triple;
pub mod widecolumn;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use crate::client::RawResult;
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::normalize::{coerce, Normalized, Record};
use crate::schema::{FieldBinding, FieldMapping, FieldType};
use crate::transpiler::NativeQuery;
use crate::value::Value;

pub use document::DocumentBackend;
pub use graph::GraphBackend;
pub use keyvalue::KeyValueBackend;
pub use triple::TripleBackend;
pub use widecolumn::WideColumnBackend;

/// The five database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Document,
    Graph,
    KeyValue,
    WideColumn,
    Triple,
}

impl BackendKind {
    /// Every kind, in the order comparisons report them.
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Document,
        BackendKind::Graph,
        BackendKind::KeyValue,
        BackendKind::WideColumn,
        BackendKind::Triple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Document => "document",
            BackendKind::Graph => "graph",
            BackendKind::KeyValue => "key-value",
            BackendKind::WideColumn => "wide-column",
            BackendKind::Triple => "triple",
        }
    }

    /// The query language the family speaks.
    pub fn dialect(&self) -> &'static str {
        match self {
            BackendKind::Document => "MongoDB aggregation",
            BackendKind::Graph => "Cypher",
            BackendKind::KeyValue => "RediSearch",
            BackendKind::WideColumn => "HBase shell",
            BackendKind::Triple => "SPARQL 1.1",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" | "doc" | "mongo" | "mongodb" => Ok(BackendKind::Document),
            "graph" | "neo4j" | "cypher" => Ok(BackendKind::Graph),
            "key-value" | "keyvalue" | "kv" | "redis" => Ok(BackendKind::KeyValue),
            "wide-column" | "widecolumn" | "wc" | "hbase" => Ok(BackendKind::WideColumn),
            "triple" | "triple-store" | "rdf" | "sparql" => Ok(BackendKind::Triple),
            other => Err(format!(
                "unknown backend '{}' (expected document, graph, key-value, wide-column or triple)",
                other
            )),
        }
    }
}

/// One adapter per database family.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Pure translation; never touches the client.
    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery>;

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult>;

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized>;

    /// Fields of the mapped entity as this backend stores them.
    async fn describe_schema(&self, mapping: &FieldMapping) -> EngineResult<SchemaDescription> {
        let query = self.translate(&Intent::describe_schema(&mapping.entity), mapping)?;
        match self.execute(&query).await? {
            RawResult::Fields(natives) => Ok(SchemaDescription::new(self.kind(), mapping, natives)),
            _ => Err(EngineError::execution(
                self.kind(),
                "schema query returned entity data",
            )),
        }
    }
}

/// A fresh in-memory adapter for `kind`.
pub fn in_memory(kind: BackendKind) -> Arc<dyn Backend> {
    match kind {
        BackendKind::Document => Arc::new(DocumentBackend::in_memory()),
        BackendKind::Graph => Arc::new(GraphBackend::in_memory()),
        BackendKind::KeyValue => Arc::new(KeyValueBackend::in_memory()),
        BackendKind::WideColumn => Arc::new(WideColumnBackend::in_memory()),
        BackendKind::Triple => Arc::new(TripleBackend::in_memory()),
    }
}

/// One field as a backend sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub native: String,
    pub canonical: Option<String>,
    pub field_type: Option<FieldType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub backend: BackendKind,
    pub native_entity: String,
    pub fields: Vec<SchemaField>,
}

impl SchemaDescription {
    /// Mapped fields first, then stored fields the mapping does not cover.
    pub fn new(backend: BackendKind, mapping: &FieldMapping, natives: Vec<String>) -> Self {
        let mut fields: Vec<SchemaField> = mapping
            .fields
            .iter()
            .map(|b| SchemaField {
                native: b.native.clone(),
                canonical: Some(b.canonical.clone()),
                field_type: Some(b.field_type),
            })
            .collect();

        let mut unmapped: Vec<String> = natives
            .into_iter()
            .filter(|native| !mapping.fields.iter().any(|b| covers(&b.native, native)))
            .collect();
        unmapped.sort();
        unmapped.dedup();
        fields.extend(unmapped.into_iter().map(|native| SchemaField {
            native,
            canonical: None,
            field_type: None,
        }));

        Self {
            backend,
            native_entity: mapping.native_entity.clone(),
            fields,
        }
    }

    /// One `{field, native, type}` record per field.
    pub fn records(&self) -> Vec<Record> {
        self.fields
            .iter()
            .map(|f| {
                let mut record = Record::new();
                record.insert(
                    "field",
                    f.canonical.clone().map(Value::Text).unwrap_or(Value::NotApplicable),
                );
                record.insert("native", Value::Text(f.native.clone()));
                record.insert(
                    "type",
                    f.field_type
                        .map(|t| Value::Text(t.to_string()))
                        .unwrap_or(Value::NotApplicable),
                );
                record
            })
            .collect()
    }
}

/// Whether a stored field name is the mapped native field or a step of its path.
fn covers(mapped: &str, stored: &str) -> bool {
    mapped == stored || mapped.starts_with(&format!("{}/", stored))
}

/// Raw results every family shares: mutation counts and schema listings.
pub(crate) fn normalize_common(
    kind: BackendKind,
    raw: RawResult,
    mapping: &FieldMapping,
) -> EngineResult<Normalized> {
    match raw {
        RawResult::Affected(_) => Ok(Normalized::default()),
        RawResult::Fields(natives) => Ok(Normalized::records(
            SchemaDescription::new(kind, mapping, natives).records(),
        )),
        _ => Err(EngineError::execution(
            kind,
            "client returned results for another backend family",
        )),
    }
}

/// Read one raw field as its canonical type.
pub(crate) fn decode(binding: &FieldBinding, raw: Value, separator: &str) -> Result<Value, String> {
    let shown = raw.to_string();
    coerce(raw, binding.field_type, separator).ok_or_else(|| {
        format!(
            "'{}' holds '{}', expected {}",
            binding.native, shown, binding.field_type
        )
    })
}

/// Reject a query rendered for a different family.
pub(crate) fn wrong_family(kind: BackendKind, query: &NativeQuery) -> EngineError {
    EngineError::execution(
        kind,
        format!("query was rendered for the {} backend", query.backend()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("redis".parse::<BackendKind>(), Ok(BackendKind::KeyValue));
        assert_eq!("wide-column".parse::<BackendKind>(), Ok(BackendKind::WideColumn));
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for kind in BackendKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.to_string()));
        }
    }

    #[test]
    fn test_schema_description_lists_unmapped_fields() {
        let mapping = movie_mapping(BackendKind::Triple);
        let description = SchemaDescription::new(
            BackendKind::Triple,
            &mapping,
            vec!["ex:title".into(), "ex:directedBy".into(), "ex:plot".into()],
        );
        assert_eq!(description.fields.len(), 7);
        let last = description.fields.last().unwrap();
        assert_eq!(last.native, "ex:plot");
        assert_eq!(last.canonical, None);

        let records = description.records();
        assert_eq!(records[0].get("field"), Some(&Value::from("title")));
        assert_eq!(records[6].get("type"), Some(&Value::NotApplicable));
    }
}
