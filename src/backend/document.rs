//! Document-store adapter (MongoDB).

use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::sync::Arc;

use super::{decode, normalize_common, wrong_family, Backend, BackendKind, RawResult};
use crate::client::memory::MemoryDocumentStore;
use crate::client::Client;
use crate::error::EngineResult;
use crate::intent::Intent;
use crate::normalize::{Normalized, Record, RecordBuilder};
use crate::schema::FieldMapping;
use crate::transpiler::{DocumentQuery, NativeQuery, ToDocument};
use crate::value::Value;

/// Lists stored as a single string split on this.
const LIST_SEPARATOR: &str = ",";

pub struct DocumentBackend {
    client: Arc<dyn Client<DocumentQuery>>,
}

impl DocumentBackend {
    pub fn new(client: Arc<dyn Client<DocumentQuery>>) -> Self {
        Self { client }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDocumentStore::new()))
    }
}

/// The value at a dotted path, if every step exists.
fn lookup<'a>(doc: &'a Map<String, Json>, path: &str) -> Option<&'a Json> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn to_record(doc: &Map<String, Json>, mapping: &FieldMapping) -> Result<Record, String> {
    let label = match doc.get("_id") {
        Some(id) => format!("document _id={}", id),
        None => "document without _id".to_string(),
    };
    let mut builder = RecordBuilder::new();
    for binding in &mapping.fields {
        if let Some(raw) = lookup(doc, &binding.native) {
            let value = decode(binding, Value::from_json(raw), LIST_SEPARATOR)
                .map_err(|reason| format!("{}: {}", label, reason))?;
            builder.canonical(&binding.canonical, value);
        }
    }
    builder.check_identity(mapping, &label)?;

    for (key, raw) in doc {
        let mapped = mapping
            .fields
            .iter()
            .any(|b| b.native == *key || b.native.starts_with(&format!("{}.", key)));
        if !mapped {
            builder.extra(key, Value::from_json(raw));
        }
    }
    Ok(builder.build(mapping))
}

#[async_trait]
impl Backend for DocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
        Ok(NativeQuery::Document(intent.to_document(mapping)?))
    }

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult> {
        match query {
            NativeQuery::Document(q) => self.client.run(q).await,
            other => Err(wrong_family(self.kind(), other)),
        }
    }

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized> {
        match raw {
            RawResult::Documents(docs) => Ok(docs.iter().map(|d| to_record(d, mapping)).collect()),
            other => normalize_common(self.kind(), other, mapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;
    use crate::value::NOT_APPLICABLE;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn docs(values: Vec<Json>) -> RawResult {
        RawResult::Documents(values.into_iter().filter_map(|v| v.as_object().cloned()).collect())
    }

    #[test]
    fn test_normalize_nested_and_extras() {
        let backend = DocumentBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Document);
        let raw = docs(vec![json!({
            "_id": 7,
            "title": "Goodfellas",
            "year": 1990,
            "genres": ["Crime", "Drama"],
            "directors": ["Martin Scorsese"],
            "imdb": {"rating": 8.7},
            "runtime": 146
        })]);
        let out = backend.normalize(raw, &mapping).unwrap();
        let record = &out.records[0];
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(
            keys,
            vec!["title", "year", "genre", "director", "cast", "rating", "_id", "runtime"]
        );
        assert_eq!(record.get("rating"), Some(&Value::Float(8.7)));
        assert_eq!(record.get("cast").map(|v| v.to_string()), Some(NOT_APPLICABLE.to_string()));
    }

    #[test]
    fn test_bad_documents_are_skipped() {
        let backend = DocumentBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Document);
        let raw = docs(vec![
            json!({"_id": 1, "title": "Ghost", "year": 1990}),
            json!({"_id": 2, "title": "Hook", "year": "nineteen ninety-one"}),
            json!({"_id": 3, "year": 1989}),
        ]);
        let out = backend.normalize(raw, &mapping).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.skipped.len(), 2);
        assert!(out.skipped[0].starts_with("document _id=2: 'year'"));
        assert_eq!(out.skipped[1], "document _id=3 has no 'title'");
    }

    #[tokio::test]
    async fn test_rejects_foreign_query() {
        let backend = DocumentBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Graph);
        let query = crate::transpiler::translate(BackendKind::Graph, &Intent::filter("movies"), &mapping).unwrap();
        assert!(backend.execute(&query).await.is_err());
    }
}
