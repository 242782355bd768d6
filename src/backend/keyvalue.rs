//! Key-value adapter (Redis with RediSearch).

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    decode, normalize_common, wrong_family, Backend, BackendKind, RawResult, SchemaDescription,
};
use crate::client::memory::MemoryKeyValueStore;
use crate::client::{Client, HashEntry};
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::normalize::{Normalized, Record, RecordBuilder};
use crate::schema::FieldMapping;
use crate::transpiler::keyvalue::{is_shadow, LIST_SEPARATOR};
use crate::transpiler::{KeyValueQuery, NativeQuery, ToRediSearch};
use crate::value::Value;

pub struct KeyValueBackend {
    client: Arc<dyn Client<KeyValueQuery>>,
}

impl KeyValueBackend {
    pub fn new(client: Arc<dyn Client<KeyValueQuery>>) -> Self {
        Self { client }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }
}

fn to_record(entry: HashEntry, mapping: &FieldMapping) -> Result<Record, String> {
    let label = format!("hash {}", entry.key);
    let mut builder = RecordBuilder::new();
    for binding in &mapping.fields {
        if let Some(raw) = entry.fields.get(&binding.native) {
            let value = decode(binding, Value::Text(raw.clone()), LIST_SEPARATOR)
                .map_err(|reason| format!("{}: {}", label, reason))?;
            builder.canonical(&binding.canonical, value);
        }
    }
    builder.check_identity(mapping, &label)?;

    for (field, raw) in &entry.fields {
        if mapping.by_native(field).is_none() && !is_shadow(mapping, field) {
            builder.extra(field, Value::Text(raw.clone()));
        }
    }
    builder.extra("key", Value::Text(entry.key));
    Ok(builder.build(mapping))
}

/// Shadow fields are an indexing detail, not part of the entity.
fn without_shadows(natives: Vec<String>, mapping: &FieldMapping) -> Vec<String> {
    natives
        .into_iter()
        .filter(|n| !is_shadow(mapping, n))
        .collect()
}

#[async_trait]
impl Backend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
        Ok(NativeQuery::KeyValue(intent.to_redisearch(mapping)?))
    }

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult> {
        match query {
            NativeQuery::KeyValue(q) => self.client.run(q).await,
            other => Err(wrong_family(self.kind(), other)),
        }
    }

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized> {
        match raw {
            RawResult::Hashes(entries) => Ok(entries.into_iter().map(|e| to_record(e, mapping)).collect()),
            RawResult::Fields(natives) => {
                normalize_common(self.kind(), RawResult::Fields(without_shadows(natives, mapping)), mapping)
            }
            other => normalize_common(self.kind(), other, mapping),
        }
    }

    async fn describe_schema(&self, mapping: &FieldMapping) -> EngineResult<SchemaDescription> {
        let query = self.translate(&Intent::describe_schema(&mapping.entity), mapping)?;
        match self.execute(&query).await? {
            RawResult::Fields(natives) => Ok(SchemaDescription::new(
                self.kind(),
                mapping,
                without_shadows(natives, mapping),
            )),
            _ => Err(EngineError::execution(self.kind(), "FT.INFO returned entity data")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn entry(key: &str, fields: &[(&str, &str)]) -> HashEntry {
        HashEntry {
            key: key.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_decodes_strings() {
        let backend = KeyValueBackend::in_memory();
        let mapping = movie_mapping(BackendKind::KeyValue);
        let raw = RawResult::Hashes(vec![entry(
            "movies:Home%20Alone!e1990",
            &[
                ("title", "Home Alone"),
                ("title_lc", "home alone"),
                ("year", "1990"),
                ("genre", "Comedy,Family"),
                ("rating", "7.7"),
            ],
        )]);
        let out = backend.normalize(raw, &mapping).unwrap();
        let record = &out.records[0];
        assert_eq!(record.get("year"), Some(&Value::Int(1990)));
        assert_eq!(record.get("genre"), Some(&Value::from(vec!["Comedy", "Family"])));
        assert_eq!(record.get("rating"), Some(&Value::Float(7.7)));
        assert_eq!(record.get("title_lc"), None);
        assert_eq!(record.get("key"), Some(&Value::from("movies:Home%20Alone!e1990")));
    }

    #[test]
    fn test_schema_listing_hides_shadows() {
        let backend = KeyValueBackend::in_memory();
        let mapping = movie_mapping(BackendKind::KeyValue);
        let raw = RawResult::Fields(vec!["title".into(), "title_lc".into(), "budget".into()]);
        let out = backend.normalize(raw, &mapping).unwrap();
        assert_eq!(out.records.len(), 7);
        assert_eq!(out.records[6].get("native"), Some(&Value::from("budget")));
    }
}
