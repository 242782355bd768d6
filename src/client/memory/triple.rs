//! In-memory RDF graph answering structured SPARQL commands.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tokio::sync::RwLock;

use super::{matches_any, Health};
use crate::backend::BackendKind;
use crate::client::{Binding, Client, RawResult, Term};
use crate::error::EngineResult;
use crate::intent::Operator;
use crate::transpiler::triple::{
    node_iri, PathAssignment, TripleCommand, TripleFilter, TripleQuery, LIST_SEPARATOR, RDF_TYPE,
};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
struct Triple {
    subject: String,
    predicate: String,
    object: Term,
}

#[derive(Debug, Default)]
pub struct MemoryTripleStore {
    triples: RwLock<Vec<Triple>>,
    health: Health,
}

impl MemoryTripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Assert one triple; all names are full IRIs.
    pub async fn insert(&self, subject: &str, predicate: &str, object: Term) {
        let mut triples = self.triples.write().await;
        add(&mut triples, subject, predicate, object);
    }

    pub async fn len(&self) -> usize {
        self.triples.read().await.len()
    }
}

fn add(triples: &mut Vec<Triple>, subject: &str, predicate: &str, object: Term) {
    let triple = Triple {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object,
    };
    if !triples.contains(&triple) {
        triples.push(triple);
    }
}

fn objects<'a>(triples: &'a [Triple], subject: &'a str, predicate: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
    triples
        .iter()
        .filter(move |t| t.subject == subject && t.predicate == predicate)
        .map(|t| &t.object)
}

/// Terms reached from `subject` along an expanded one- or two-step path.
fn follow(triples: &[Triple], subject: &str, path: &[String]) -> Vec<Term> {
    match path {
        [predicate] => objects(triples, subject, predicate).cloned().collect(),
        [link, leaf] => objects(triples, subject, link)
            .filter_map(|t| match t {
                Term::Iri(node) => Some(node.as_str()),
                Term::Literal(_) => None,
            })
            .flat_map(|node| objects(triples, node, leaf).cloned().collect::<Vec<_>>())
            .collect(),
        _ => vec![],
    }
}

fn subjects_of(triples: &[Triple], class: &str) -> Vec<String> {
    let mut subjects = Vec::new();
    for t in triples {
        if t.predicate == RDF_TYPE && t.object == Term::Iri(class.to_string()) && !subjects.contains(&t.subject) {
            subjects.push(t.subject.clone());
        }
    }
    subjects
}

struct Resolver<'a> {
    query: &'a TripleQuery,
}

impl Resolver<'_> {
    fn path(&self, path: &[String]) -> Vec<String> {
        path.iter().map(|p| self.query.expand(p)).collect()
    }

    fn satisfies(&self, triples: &[Triple], subject: &str, filters: &[TripleFilter]) -> bool {
        filters.iter().all(|f| {
            let stored: Vec<Value> = follow(triples, subject, &self.path(&f.path))
                .iter()
                .map(Term::to_value)
                .collect();
            let operand = match f.operator {
                Operator::InSet => Value::List(f.operands.clone()),
                _ => f.operands.first().cloned().unwrap_or_default(),
            };
            matches_any(&stored, f.operator, &operand, f.fold)
        })
    }

    fn matching(&self, triples: &[Triple], class: &str, filters: &[TripleFilter]) -> Vec<String> {
        subjects_of(triples, &self.query.expand(class))
            .into_iter()
            .filter(|s| self.satisfies(triples, s, filters))
            .collect()
    }

    /// Replace each assigned path's first hop on `subject`.
    fn replace(&self, triples: &mut Vec<Triple>, subject: &str, assignments: &[PathAssignment]) {
        for a in assignments {
            let path = self.path(&a.path);
            triples.retain(|t| !(t.subject == subject && t.predicate == path[0]));
            for value in &a.values {
                match path.as_slice() {
                    [predicate] => add(triples, subject, predicate, Term::Literal(value.clone())),
                    [link, leaf] => {
                        let node = node_iri(value);
                        add(triples, subject, link, Term::Iri(node.clone()));
                        add(triples, &node, leaf, Term::Literal(value.clone()));
                    }
                    _ => {}
                }
            }
        }
    }
}

fn order(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_value().compare(&y.to_value()).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl Client<TripleQuery> for MemoryTripleStore {
    async fn run(&self, query: &TripleQuery) -> EngineResult<RawResult> {
        self.health.check(BackendKind::Triple).await?;
        let resolver = Resolver { query };

        match &query.command {
            TripleCommand::Select {
                class,
                filters,
                projections,
                order_by,
                limit,
                offset,
            } => {
                let triples = self.triples.read().await;
                let mut bindings: Vec<Binding> = resolver
                    .matching(&triples, class, filters)
                    .into_iter()
                    .map(|subject| {
                        let mut binding = Binding::new();
                        for p in projections {
                            let terms = follow(&triples, &subject, &resolver.path(&p.path));
                            if p.multi {
                                let mut seen = Vec::new();
                                for term in &terms {
                                    let text = term.to_value().to_string();
                                    if !seen.contains(&text) {
                                        seen.push(text);
                                    }
                                }
                                binding.insert(
                                    p.var.clone(),
                                    Term::Literal(Value::Text(seen.join(LIST_SEPARATOR))),
                                );
                            } else if let Some(first) = terms.into_iter().next() {
                                binding.insert(p.var.clone(), first);
                            }
                        }
                        binding.insert("s".to_string(), Term::Iri(subject));
                        binding
                    })
                    .collect();
                bindings.sort_by(|a, b| {
                    order_by
                        .iter()
                        .map(|var| order(a.get(var), b.get(var)))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
                let bindings = bindings
                    .into_iter()
                    .skip(offset.unwrap_or(0) as usize)
                    .take(limit.map_or(usize::MAX, |n| n as usize))
                    .collect();
                Ok(RawResult::Bindings(bindings))
            }
            TripleCommand::Upsert {
                subject,
                class,
                assignments,
            } => {
                let mut triples = self.triples.write().await;
                add(&mut triples, subject, RDF_TYPE, Term::Iri(query.expand(class)));
                resolver.replace(&mut triples, subject, assignments);
                Ok(RawResult::Affected(1))
            }
            TripleCommand::Modify {
                class,
                filters,
                assignments,
            } => {
                let mut triples = self.triples.write().await;
                let subjects = resolver.matching(&triples, class, filters);
                for subject in &subjects {
                    resolver.replace(&mut triples, subject, assignments);
                }
                Ok(RawResult::Affected(subjects.len() as u64))
            }
            TripleCommand::Delete { class, filters } => {
                let mut triples = self.triples.write().await;
                let subjects: BTreeSet<String> = resolver.matching(&triples, class, filters).into_iter().collect();
                triples.retain(|t| !subjects.contains(&t.subject));
                Ok(RawResult::Affected(subjects.len() as u64))
            }
            TripleCommand::Predicates { class } => {
                let triples = self.triples.read().await;
                let subjects: BTreeSet<String> = subjects_of(&triples, &query.expand(class)).into_iter().collect();
                let predicates: BTreeSet<String> = triples
                    .iter()
                    .filter(|t| subjects.contains(&t.subject) && t.predicate != RDF_TYPE)
                    .map(|t| query.compact(&t.predicate))
                    .collect();
                Ok(RawResult::Fields(predicates.into_iter().collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use crate::schema::movie_mapping;
    use crate::transpiler::triple::EX_NAMESPACE;
    use crate::transpiler::ToSparql;

    async fn run(store: &MemoryTripleStore, intent: Intent) -> RawResult {
        let query = intent.to_sparql(&movie_mapping(BackendKind::Triple)).unwrap();
        store.run(&query).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_select() {
        let store = MemoryTripleStore::new();
        let create = Intent::create("movies")
            .value("title", "Saving Private Ryan")
            .value("year", 1998)
            .value("genre", vec!["Drama", "War"]);
        run(&store, create.clone()).await;
        let size = store.len().await;
        run(&store, create).await;
        assert_eq!(store.len().await, size);

        let RawResult::Bindings(rows) = run(&store, Intent::filter("movies").eq("genre", "War")).await else {
            panic!("expected bindings");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["genre"], Term::Literal(Value::from("Drama|War")));
        assert_eq!(
            rows[0]["s"],
            Term::Iri(format!("{}movie/Saving%20Private%20Ryan_1998", EX_NAMESPACE))
        );
        assert!(!rows[0].contains_key("rating"));
    }

    #[tokio::test]
    async fn test_modify_and_delete() {
        let store = MemoryTripleStore::new();
        run(&store, Intent::create("movies").value("title", "Hook").value("year", 1991).value("rating", 6.8)).await;
        let updated = run(
            &store,
            Intent::update("movies").eq("title", "Hook").eq("year", 1991).set("rating", 7.0),
        )
        .await;
        assert_eq!(updated, RawResult::Affected(1));

        let RawResult::Bindings(rows) = run(&store, Intent::filter("movies").gt("rating", 6.9)).await else {
            panic!("expected bindings");
        };
        assert_eq!(rows.len(), 1);

        let fields = run(&store, Intent::describe_schema("movies")).await;
        assert_eq!(
            fields,
            RawResult::Fields(vec!["ex:imdbRating".into(), "ex:title".into(), "ex:year".into()])
        );

        let deleted = run(&store, Intent::delete("movies").eq("title", "Hook").eq("year", 1991)).await;
        assert_eq!(deleted, RawResult::Affected(1));
        assert_eq!(store.len().await, 0);
    }
}
