//! Graph adapter (Neo4j).

use async_trait::async_trait;
use std::sync::Arc;

use super::{decode, normalize_common, wrong_family, Backend, BackendKind, RawResult};
use crate::client::memory::MemoryGraphStore;
use crate::client::{Client, GraphRow};
use crate::error::EngineResult;
use crate::intent::Intent;
use crate::normalize::{Normalized, Record, RecordBuilder};
use crate::schema::FieldMapping;
use crate::transpiler::graph::Target;
use crate::transpiler::{GraphQuery, NativeQuery, ToCypher};
use crate::value::Value;

pub struct GraphBackend {
    client: Arc<dyn Client<GraphQuery>>,
}

impl GraphBackend {
    pub fn new(client: Arc<dyn Client<GraphQuery>>) -> Self {
        Self { client }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGraphStore::new()))
    }
}

fn to_record(index: usize, row: GraphRow, mapping: &FieldMapping) -> EngineResult<Result<Record, String>> {
    let label = format!("node #{}", index);
    let GraphRow { mut node, mut related } = row;
    let mut builder = RecordBuilder::new();

    for binding in &mapping.fields {
        let raw = match Target::from_binding(binding)? {
            Target::Property(prop) => node.remove(&prop),
            Target::Relation(rel) => related.remove(&rel.alias).map(Value::List),
        };
        if let Some(raw) = raw {
            match decode(binding, raw, ",") {
                Ok(value) => builder.canonical(&binding.canonical, value),
                Err(reason) => return Ok(Err(format!("{}: {}", label, reason))),
            }
        }
    }
    if let Err(reason) = builder.check_identity(mapping, &label) {
        return Ok(Err(reason));
    }
    for (prop, value) in node {
        builder.extra(&prop, value);
    }
    Ok(Ok(builder.build(mapping)))
}

#[async_trait]
impl Backend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
        Ok(NativeQuery::Graph(intent.to_cypher(mapping)?))
    }

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult> {
        match query {
            NativeQuery::Graph(q) => self.client.run(q).await,
            other => Err(wrong_family(self.kind(), other)),
        }
    }

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized> {
        match raw {
            RawResult::GraphRows(rows) => rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| to_record(i, row, mapping))
                .collect::<EngineResult<Normalized>>(),
            other => normalize_common(self.kind(), other, mapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_relations_become_lists() {
        let backend = GraphBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Graph);
        let row = GraphRow {
            node: BTreeMap::from([
                ("title".to_string(), Value::from("Jurassic Park")),
                ("year".to_string(), Value::Int(1993)),
                ("imdb_rating".to_string(), Value::Float(8.2)),
                ("tagline".to_string(), Value::from("An adventure 65 million years in the making.")),
            ]),
            related: BTreeMap::from([
                ("director".to_string(), vec![Value::from("Steven Spielberg")]),
                ("cast".to_string(), vec![]),
            ]),
        };
        let out = backend.normalize(RawResult::GraphRows(vec![row]), &mapping).unwrap();
        let record = &out.records[0];
        assert_eq!(record.get("director"), Some(&Value::from(vec!["Steven Spielberg"])));
        assert_eq!(record.get("cast"), Some(&Value::List(vec![])));
        assert_eq!(record.get("rating"), Some(&Value::Float(8.2)));
        assert_eq!(record.keys().last(), Some("tagline"));
    }

    #[test]
    fn test_missing_identity_skips_row() {
        let backend = GraphBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Graph);
        let row = GraphRow {
            node: BTreeMap::from([("title".to_string(), Value::from("Untitled"))]),
            related: BTreeMap::new(),
        };
        let out = backend.normalize(RawResult::GraphRows(vec![row]), &mapping).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.skipped, vec!["node #0 has no 'year'".to_string()]);
    }
}
