//! Triple-store adapter (SPARQL endpoint).

use async_trait::async_trait;
use std::sync::Arc;

use super::{decode, normalize_common, wrong_family, Backend, BackendKind, RawResult};
use crate::client::memory::MemoryTripleStore;
use crate::client::{Binding, Client};
use crate::error::EngineResult;
use crate::intent::Intent;
use crate::normalize::{Normalized, Record, RecordBuilder};
use crate::schema::FieldMapping;
use crate::transpiler::triple::LIST_SEPARATOR;
use crate::transpiler::{NativeQuery, ToSparql, TripleQuery};
use crate::value::Value;

pub struct TripleBackend {
    client: Arc<dyn Client<TripleQuery>>,
}

impl TripleBackend {
    pub fn new(client: Arc<dyn Client<TripleQuery>>) -> Self {
        Self { client }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTripleStore::new()))
    }
}

fn to_record(mut binding: Binding, mapping: &FieldMapping) -> Result<Record, String> {
    let subject = binding.remove("s").map(|t| t.to_value());
    let label = match &subject {
        Some(iri) => format!("subject <{}>", iri),
        None => "unbound subject".to_string(),
    };
    let mut builder = RecordBuilder::new();
    for field in &mapping.fields {
        if let Some(term) = binding.remove(&field.canonical) {
            let value = decode(field, term.to_value(), LIST_SEPARATOR)
                .map_err(|reason| format!("{}: {}", label, reason))?;
            builder.canonical(&field.canonical, value);
        }
    }
    builder.check_identity(mapping, &label)?;

    for (var, term) in binding {
        builder.extra(&var, term.to_value());
    }
    builder.extra("subject", subject.unwrap_or(Value::NotApplicable));
    Ok(builder.build(mapping))
}

#[async_trait]
impl Backend for TripleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Triple
    }

    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
        Ok(NativeQuery::Triple(intent.to_sparql(mapping)?))
    }

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult> {
        match query {
            NativeQuery::Triple(q) => self.client.run(q).await,
            other => Err(wrong_family(self.kind(), other)),
        }
    }

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized> {
        match raw {
            RawResult::Bindings(rows) => Ok(rows.into_iter().map(|b| to_record(b, mapping)).collect()),
            other => normalize_common(self.kind(), other, mapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Term;
    use crate::schema::movie_mapping;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_group_concat_splits() {
        let backend = TripleBackend::in_memory();
        let mapping = movie_mapping(BackendKind::Triple);
        let binding = Binding::from([
            ("s".to_string(), Term::Iri("http://example.org/movie/Hook_1991".to_string())),
            ("title".to_string(), Term::Literal(Value::from("Hook"))),
            ("year".to_string(), Term::Literal(Value::Int(1991))),
            ("genre".to_string(), Term::Literal(Value::from("Adventure|Family"))),
            ("cast".to_string(), Term::Literal(Value::from(""))),
        ]);
        let out = backend.normalize(RawResult::Bindings(vec![binding]), &mapping).unwrap();
        let record = &out.records[0];
        assert_eq!(record.get("genre"), Some(&Value::from(vec!["Adventure", "Family"])));
        assert_eq!(record.get("cast"), Some(&Value::List(vec![])));
        assert_eq!(
            record.get("subject"),
            Some(&Value::from("http://example.org/movie/Hook_1991"))
        );
    }
}
