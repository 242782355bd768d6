//! In-memory hash store with a RediSearch-style index over one key prefix.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::Health;
use crate::backend::BackendKind;
use crate::client::{Client, HashEntry, RawResult};
use crate::error::EngineResult;
use crate::transpiler::keyvalue::{
    Clause, KeyValueCommand, KeyValueQuery, RangeBound, SortKey, TagPattern, LIST_SEPARATOR,
};

type Hash = BTreeMap<String, String>;

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    hashes: RwLock<BTreeMap<String, Hash>>,
    health: Health,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// `HSET key field value ...` without going through the index.
    pub async fn hset(&self, key: &str, fields: impl IntoIterator<Item = (String, String)>) {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .extend(fields);
    }

    pub async fn hgetall(&self, key: &str) -> Option<Hash> {
        self.hashes.read().await.get(key).cloned()
    }
}

fn in_range(value: f64, lo: RangeBound, hi: RangeBound) -> bool {
    let above = match lo {
        RangeBound::Inclusive(b) => value >= b,
        RangeBound::Exclusive(b) => value > b,
        RangeBound::Unbounded => true,
    };
    let below = match hi {
        RangeBound::Inclusive(b) => value <= b,
        RangeBound::Exclusive(b) => value < b,
        RangeBound::Unbounded => true,
    };
    above && below
}

fn clause_matches(hash: &Hash, clause: &Clause) -> bool {
    match clause {
        Clause::Numeric { field, ranges } => hash
            .get(field)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .is_some_and(|v| ranges.iter().any(|(lo, hi)| in_range(v, *lo, *hi))),
        Clause::Tag { field, patterns, list } => hash.get(field).is_some_and(|stored| {
            let tag_matches = |tag: &str| {
                patterns.iter().any(|p| match p {
                    TagPattern::Exact(s) => tag == s,
                    TagPattern::Infix(s) => tag.contains(s.as_str()),
                })
            };
            if *list {
                stored.split(LIST_SEPARATOR).map(str::trim).any(tag_matches)
            } else {
                tag_matches(stored.trim())
            }
        }),
    }
}

/// Keys under `prefix` whose hashes satisfy every clause.
fn search<'a>(
    hashes: &'a BTreeMap<String, Hash>,
    prefix: &str,
    clauses: &[Clause],
) -> Vec<(&'a String, &'a Hash)> {
    hashes
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .filter(|(_, hash)| clauses.iter().all(|c| clause_matches(hash, c)))
        .collect()
}

/// One SORTBY property; numeric properties that fail to parse sort as text.
fn sort_value(key: &SortKey, a: Option<&String>, b: Option<&String>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if key.numeric => match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => x.cmp(y),
        },
        (Some(x), Some(y)) => x.cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

#[async_trait]
impl Client<KeyValueQuery> for MemoryKeyValueStore {
    async fn run(&self, query: &KeyValueQuery) -> EngineResult<RawResult> {
        self.health.check(BackendKind::KeyValue).await?;

        match &query.command {
            KeyValueCommand::Search {
                clauses,
                fields,
                sort_by,
                offset,
                limit,
            } => {
                let hashes = self.hashes.read().await;
                let mut hits = search(&hashes, &query.prefix, clauses);
                hits.sort_by(|(ka, a), (kb, b)| {
                    sort_by
                        .iter()
                        .map(|key| sort_value(key, a.get(&key.field), b.get(&key.field)))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| ka.cmp(kb))
                });
                let entries = hits
                    .into_iter()
                    .skip(*offset as usize)
                    .take(*limit as usize)
                    .map(|(key, hash)| HashEntry {
                        key: key.clone(),
                        fields: if fields.is_empty() {
                            hash.clone()
                        } else {
                            hash.iter()
                                .filter(|(f, _)| fields.contains(f))
                                .map(|(f, v)| (f.clone(), v.clone()))
                                .collect()
                        },
                    })
                    .collect();
                Ok(RawResult::Hashes(entries))
            }
            KeyValueCommand::HashSet { key, fields } => {
                self.hset(key, fields.iter().cloned()).await;
                Ok(RawResult::Affected(1))
            }
            KeyValueCommand::SetMatching { clauses, fields } => {
                let mut hashes = self.hashes.write().await;
                let keys: Vec<String> = search(&hashes, &query.prefix, clauses)
                    .into_iter()
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &keys {
                    if let Some(hash) = hashes.get_mut(key) {
                        hash.extend(fields.iter().cloned());
                    }
                }
                Ok(RawResult::Affected(keys.len() as u64))
            }
            KeyValueCommand::DeleteMatching { clauses } => {
                let mut hashes = self.hashes.write().await;
                let keys: Vec<String> = search(&hashes, &query.prefix, clauses)
                    .into_iter()
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &keys {
                    hashes.remove(key);
                }
                Ok(RawResult::Affected(keys.len() as u64))
            }
            KeyValueCommand::Info => {
                let hashes = self.hashes.read().await;
                let names: BTreeSet<String> = search(&hashes, &query.prefix, &[])
                    .into_iter()
                    .flat_map(|(_, hash)| hash.keys().cloned())
                    .collect();
                Ok(RawResult::Fields(names.into_iter().collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use crate::schema::movie_mapping;
    use crate::transpiler::ToRediSearch;

    async fn run(store: &MemoryKeyValueStore, intent: Intent) -> RawResult {
        let query = intent
            .to_redisearch(&movie_mapping(BackendKind::KeyValue))
            .unwrap();
        store.run(&query).await.unwrap()
    }

    #[test]
    fn test_ranges() {
        assert!(in_range(8.7, RangeBound::Exclusive(8.5), RangeBound::Unbounded));
        assert!(!in_range(8.5, RangeBound::Exclusive(8.5), RangeBound::Unbounded));
        assert!(in_range(1993.0, RangeBound::Inclusive(1993.0), RangeBound::Inclusive(1993.0)));
    }

    #[tokio::test]
    async fn test_search_uses_shadow_fields() {
        let store = MemoryKeyValueStore::new();
        run(
            &store,
            Intent::create("movies")
                .value("title", "Jurassic Park")
                .value("year", 1993)
                .value("director", vec!["Steven Spielberg"]),
        )
        .await;
        store
            .hset("sessions:1", [("title".to_string(), "Jurassic Park".to_string())])
            .await;

        let RawResult::Hashes(hits) =
            run(&store, Intent::filter("movies").contains_ci("director", "SPIEL")).await
        else {
            panic!("expected hashes");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "movies:Jurassic%20Park!e1993");
        assert!(!hits[0].fields.contains_key("director_lc"));
    }

    #[tokio::test]
    async fn test_sort_and_page() {
        let store = MemoryKeyValueStore::new();
        for (title, year) in [("Ghost", 1990), ("Always", 1989), ("Hook", 1991)] {
            run(&store, Intent::create("movies").value("title", title).value("year", year)).await;
        }
        let RawResult::Hashes(hits) = run(&store, Intent::filter("movies").limit(1).offset(1)).await else {
            panic!("expected hashes");
        };
        assert_eq!(hits[0].fields["title"], "Ghost");

        let deleted = run(&store, Intent::delete("movies").eq("title", "Hook").eq("year", 1991)).await;
        assert_eq!(deleted, RawResult::Affected(1));
        assert_eq!(store.hgetall("movies:Hook!e1991").await, None);
    }

    #[tokio::test]
    async fn test_sort_uses_every_identity_field() {
        let store = MemoryKeyValueStore::new();
        for year in [2004, 1979, 986] {
            run(&store, Intent::create("movies").value("title", "Alien").value("year", year)).await;
        }
        run(&store, Intent::create("movies").value("title", "Zulu").value("year", 1964)).await;

        let RawResult::Hashes(hits) = run(&store, Intent::filter("movies")).await else {
            panic!("expected hashes");
        };
        let order: Vec<(&str, &str)> = hits
            .iter()
            .map(|h| (h.fields["title"].as_str(), h.fields["year"].as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("Alien", "986"), ("Alien", "1979"), ("Alien", "2004"), ("Zulu", "1964")]
        );
    }

    #[tokio::test]
    async fn test_comma_in_scalar_tag() {
        let store = MemoryKeyValueStore::new();
        let title = "Crouching Tiger, Hidden Dragon";
        run(
            &store,
            Intent::create("movies")
                .value("title", title)
                .value("year", 2000)
                .value("genre", vec!["Action", "Drama"]),
        )
        .await;

        let RawResult::Hashes(hits) =
            run(&store, Intent::read_by_key("movies").eq("title", title).eq("year", 2000)).await
        else {
            panic!("expected hashes");
        };
        assert_eq!(hits.len(), 1);

        let RawResult::Hashes(hits) = run(&store, Intent::filter("movies").eq("title", "Crouching Tiger")).await
        else {
            panic!("expected hashes");
        };
        assert!(hits.is_empty());

        let RawResult::Hashes(hits) = run(&store, Intent::filter("movies").eq("genre", "Drama")).await else {
            panic!("expected hashes");
        };
        assert_eq!(hits.len(), 1);
    }
}
