//! In-memory document store with Mongo filter semantics.

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{Map, Value as Json};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::Health;
use crate::backend::BackendKind;
use crate::client::{Client, RawResult};
use crate::error::{EngineError, EngineResult};
use crate::transpiler::document::{DocumentCommand, DocumentQuery};

type Document = Map<String, Json>;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    next_id: AtomicU64,
    health: Health,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Insert a raw document, assigning `_id` when missing.
    pub async fn insert(&self, collection: &str, mut doc: Document) {
        if !doc.contains_key("_id") {
            doc.insert("_id".to_string(), Json::from(self.allocate_id()));
        }
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

#[async_trait]
impl Client<DocumentQuery> for MemoryDocumentStore {
    async fn run(&self, query: &DocumentQuery) -> EngineResult<RawResult> {
        self.health.check(BackendKind::Document).await?;
        let fail = |reason: String| EngineError::execution(BackendKind::Document, reason);

        match &query.command {
            DocumentCommand::Aggregate { pipeline } => {
                let collections = self.collections.read().await;
                let docs = collections
                    .get(&query.collection)
                    .cloned()
                    .unwrap_or_default();
                aggregate(docs, pipeline).map(RawResult::Documents).map_err(fail)
            }
            DocumentCommand::Upsert { filter, set } => {
                let mut collections = self.collections.write().await;
                let docs = collections.entry(query.collection.clone()).or_default();
                let mut found = None;
                for (i, doc) in docs.iter().enumerate() {
                    if matches(doc, filter).map_err(fail)? {
                        found = Some(i);
                        break;
                    }
                }
                match found {
                    Some(i) => apply_set(&mut docs[i], set),
                    None => {
                        let mut doc = Document::new();
                        doc.insert("_id".to_string(), Json::from(self.allocate_id()));
                        if let Some(fields) = filter.as_object() {
                            for (k, v) in fields.iter().filter(|(k, _)| !k.starts_with('$')) {
                                set_path(&mut doc, k, v.clone());
                            }
                        }
                        apply_set(&mut doc, set);
                        docs.push(doc);
                    }
                }
                Ok(RawResult::Affected(1))
            }
            DocumentCommand::UpdateMany { filter, set } => {
                let mut collections = self.collections.write().await;
                let mut affected = 0;
                if let Some(docs) = collections.get_mut(&query.collection) {
                    for doc in docs.iter_mut() {
                        if matches(doc, filter).map_err(fail)? {
                            apply_set(doc, set);
                            affected += 1;
                        }
                    }
                }
                Ok(RawResult::Affected(affected))
            }
            DocumentCommand::DeleteMany { filter } => {
                let mut collections = self.collections.write().await;
                let Some(docs) = collections.get_mut(&query.collection) else {
                    return Ok(RawResult::Affected(0));
                };
                let before = docs.len();
                let mut kept = Vec::with_capacity(before);
                for doc in docs.drain(..) {
                    if !matches(&doc, filter).map_err(fail)? {
                        kept.push(doc);
                    }
                }
                let removed = before - kept.len();
                *docs = kept;
                Ok(RawResult::Affected(removed as u64))
            }
            DocumentCommand::InferSchema { sample_size } => {
                let collections = self.collections.read().await;
                let mut paths = BTreeSet::new();
                for doc in collections
                    .get(&query.collection)
                    .into_iter()
                    .flatten()
                    .take(*sample_size as usize)
                {
                    collect_paths(doc, "", &mut paths);
                }
                Ok(RawResult::Fields(paths.into_iter().collect()))
            }
        }
    }
}

fn aggregate(mut docs: Vec<Document>, pipeline: &[Json]) -> Result<Vec<Document>, String> {
    for stage in pipeline {
        let Some((name, arg)) = stage.as_object().and_then(|s| s.iter().next()) else {
            return Err(format!("malformed pipeline stage {}", stage));
        };
        docs = match name.as_str() {
            "$match" => {
                let mut kept = Vec::new();
                for doc in docs {
                    if matches(&doc, arg)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                let keys: Vec<(String, i64)> = arg
                    .as_object()
                    .ok_or("$sort takes an object")?
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_i64().unwrap_or(1)))
                    .collect();
                docs.sort_by(|a, b| {
                    for (key, direction) in &keys {
                        let ord = compare_missing_first(lookup(a, key).first(), lookup(b, key).first());
                        let ord = if *direction < 0 { ord.reverse() } else { ord };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
                docs
            }
            "$skip" => {
                let n = arg.as_u64().ok_or("$skip takes a count")? as usize;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = arg.as_u64().ok_or("$limit takes a count")? as usize;
                docs.into_iter().take(n).collect()
            }
            other => return Err(format!("unsupported pipeline stage {}", other)),
        };
    }
    Ok(docs)
}

/// Values at a dotted path; arrays at the leaf are flattened.
fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<&'a Json> {
    let mut current: Option<&Json> = None;
    for (i, segment) in path.split('.').enumerate() {
        current = if i == 0 {
            doc.get(segment)
        } else {
            current.and_then(|v| v.get(segment))
        };
        if current.is_none() {
            return vec![];
        }
    }
    match current {
        Some(Json::Array(items)) => items.iter().collect(),
        Some(v) => vec![v],
        None => vec![],
    }
}

fn json_eq(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn compare_missing_first(a: Option<&&Json>, b: Option<&&Json>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => json_cmp(x, y).unwrap_or(Ordering::Equal),
    }
}

fn matches(doc: &Document, filter: &Json) -> Result<bool, String> {
    let conditions = filter.as_object().ok_or("filter must be an object")?;
    for (key, cond) in conditions {
        let ok = if key == "$and" {
            let parts = cond.as_array().ok_or("$and takes an array")?;
            let mut all = true;
            for part in parts {
                if !matches(doc, part)? {
                    all = false;
                    break;
                }
            }
            all
        } else {
            let values = lookup(doc, key);
            match cond.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => eval_operators(&values, ops)?,
                _ => values.iter().any(|v| json_eq(v, cond)),
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_operators(values: &[&Json], ops: &Map<String, Json>) -> Result<bool, String> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => values.iter().any(|v| json_eq(v, arg)),
            "$gt" => values.iter().any(|v| json_cmp(v, arg) == Some(Ordering::Greater)),
            "$lt" => values.iter().any(|v| json_cmp(v, arg) == Some(Ordering::Less)),
            "$in" => {
                let set = arg.as_array().ok_or("$in takes an array")?;
                values.iter().any(|v| set.iter().any(|s| json_eq(v, s)))
            }
            "$regex" => {
                let pattern = arg.as_str().ok_or("$regex takes a string")?;
                let fold = ops
                    .get("$options")
                    .and_then(Json::as_str)
                    .is_some_and(|o| o.contains('i'));
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(fold)
                    .build()
                    .map_err(|e| format!("invalid $regex: {}", e))?;
                values.iter().any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
            }
            "$options" => true,
            other => return Err(format!("unsupported query operator {}", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_set(doc: &mut Document, set: &Json) {
    if let Some(fields) = set.as_object() {
        for (path, value) in fields {
            set_path(doc, path, value.clone());
        }
    }
}

/// Assign at a dotted path, creating intermediate objects.
fn set_path(doc: &mut Document, path: &str, value: Json) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if !child.is_object() {
                *child = Json::Object(Map::new());
            }
            if let Json::Object(inner) = child {
                set_path(inner, rest, value);
            }
        }
    }
}

fn collect_paths(doc: &Document, prefix: &str, out: &mut BTreeSet<String>) {
    for (key, value) in doc {
        let path = format!("{}{}", prefix, key);
        match value {
            Json::Object(inner) => collect_paths(inner, &format!("{}.", path), out),
            _ => {
                out.insert(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Json) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup_nested_and_arrays() {
        let d = doc(json!({"imdb": {"rating": 8.7}, "genres": ["Crime", "Drama"]}));
        assert_eq!(lookup(&d, "imdb.rating"), vec![&json!(8.7)]);
        assert_eq!(lookup(&d, "genres").len(), 2);
        assert!(lookup(&d, "imdb.votes").is_empty());
    }

    #[test]
    fn test_matches_operators() {
        let d = doc(json!({"title": "Goodfellas", "year": 1990, "directors": ["Martin Scorsese"]}));
        assert!(matches(&d, &json!({"year": 1990})).unwrap());
        assert!(matches(&d, &json!({"year": {"$gt": 1989, "$lt": 1991}})).unwrap());
        assert!(matches(&d, &json!({"directors": {"$regex": "scorsese", "$options": "i"}})).unwrap());
        assert!(!matches(&d, &json!({"directors": {"$regex": "scorsese"}})).unwrap());
        assert!(matches(&d, &json!({"$and": [{"year": {"$in": [1990]}}, {"title": "Goodfellas"}]})).unwrap());
    }

    #[test]
    fn test_set_path_creates_objects() {
        let mut d = Document::new();
        set_path(&mut d, "imdb.rating", json!(9.0));
        assert_eq!(Json::Object(d), json!({"imdb": {"rating": 9.0}}));
    }

    #[tokio::test]
    async fn test_upsert_then_update() {
        let store = MemoryDocumentStore::new();
        let upsert = DocumentQuery {
            collection: "movies".to_string(),
            command: DocumentCommand::Upsert {
                filter: json!({"title": "Ghost", "year": 1990}),
                set: json!({"title": "Ghost", "year": 1990, "imdb.rating": 7.1}),
            },
        };
        store.run(&upsert).await.unwrap();
        store.run(&upsert).await.unwrap();
        assert_eq!(store.count("movies").await, 1);

        let update = DocumentQuery {
            collection: "movies".to_string(),
            command: DocumentCommand::UpdateMany {
                filter: json!({"title": "Ghost"}),
                set: json!({"imdb.rating": 7.5}),
            },
        };
        assert_eq!(store.run(&update).await.unwrap(), RawResult::Affected(1));

        let schema = DocumentQuery {
            collection: "movies".to_string(),
            command: DocumentCommand::InferSchema { sample_size: 10 },
        };
        assert_eq!(
            store.run(&schema).await.unwrap(),
            RawResult::Fields(vec![
                "_id".to_string(),
                "imdb.rating".to_string(),
                "title".to_string(),
                "year".to_string()
            ])
        );
    }
}
