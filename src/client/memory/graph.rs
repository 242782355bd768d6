//! In-memory property graph executing structured Cypher statements.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::{matches_any, Health};
use crate::backend::BackendKind;
use crate::client::{Client, GraphRow, RawResult};
use crate::error::{EngineError, EngineResult};
use crate::transpiler::graph::{Condition, GraphQuery, Relation, Statement, Target};
use crate::value::Value;

#[derive(Debug, Clone)]
struct Node {
    id: u64,
    label: String,
    props: BTreeMap<String, Value>,
}

/// `(from)-[:rel_type]->(to)`
#[derive(Debug, Clone, PartialEq)]
struct Edge {
    from: u64,
    rel_type: String,
    to: u64,
}

#[derive(Debug, Default)]
struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
    health: Health,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Add a node as-is and return its id.
    pub async fn add_node(&self, label: &str, props: BTreeMap<String, Value>) -> u64 {
        self.graph.write().await.create(label, props)
    }

    pub async fn node_count(&self, label: &str) -> usize {
        self.graph
            .read()
            .await
            .nodes
            .iter()
            .filter(|n| n.label == label)
            .count()
    }
}

impl Graph {
    fn create(&mut self, label: &str, props: BTreeMap<String, Value>) -> u64 {
        self.next_id += 1;
        self.nodes.push(Node {
            id: self.next_id,
            label: label.to_string(),
            props,
        });
        self.next_id
    }

    fn node(&self, id: u64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Property values of nodes related to `id` through `rel`.
    fn related(&self, id: u64, rel: &Relation) -> Vec<Value> {
        self.edges
            .iter()
            .filter(|e| e.to == id && e.rel_type == rel.rel_type)
            .filter_map(|e| self.node(e.from))
            .filter(|n| n.label == rel.label)
            .filter_map(|n| n.props.get(&rel.property).cloned())
            .collect()
    }

    fn satisfies(&self, node: &Node, conditions: &[Condition], params: &BTreeMap<String, Value>) -> Result<bool, String> {
        for condition in conditions {
            let operand = params
                .get(&condition.param)
                .ok_or_else(|| format!("parameter ${} is not bound", condition.param))?;
            let stored: Vec<Value> = match &condition.target {
                Target::Property(prop) => match node.props.get(prop) {
                    Some(Value::List(items)) if condition.list => items.clone(),
                    Some(v) => vec![v.clone()],
                    None => vec![],
                },
                Target::Relation(rel) => self.related(node.id, rel),
            };
            if !matches_any(&stored, condition.operator, operand, condition.fold) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matching(&self, label: &str, conditions: &[Condition], params: &BTreeMap<String, Value>) -> Result<Vec<u64>, String> {
        let mut ids = Vec::new();
        for node in self.nodes.iter().filter(|n| n.label == label) {
            if self.satisfies(node, conditions, params)? {
                ids.push(node.id);
            }
        }
        Ok(ids)
    }

    fn apply(&mut self, id: u64, set: &[(Target, String)], params: &BTreeMap<String, Value>) -> Result<(), String> {
        for (target, param) in set {
            let value = params
                .get(param)
                .cloned()
                .ok_or_else(|| format!("parameter ${} is not bound", param))?;
            match target {
                Target::Property(prop) => {
                    if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
                        node.props.insert(prop.clone(), value);
                    }
                }
                Target::Relation(rel) => self.replace_relation(id, rel, &value),
            }
        }
        Ok(())
    }

    /// Drop existing `rel` edges into `id`, then link one merged node per value.
    fn replace_relation(&mut self, id: u64, rel: &Relation, value: &Value) {
        let stale: BTreeSet<u64> = self
            .edges
            .iter()
            .filter(|e| e.to == id && e.rel_type == rel.rel_type)
            .filter(|e| self.node(e.from).is_some_and(|n| n.label == rel.label))
            .map(|e| e.from)
            .collect();
        self.edges
            .retain(|e| !(e.to == id && e.rel_type == rel.rel_type && stale.contains(&e.from)));

        for item in value.elements() {
            if matches!(item, Value::Null) {
                continue;
            }
            let existing = self
                .nodes
                .iter()
                .find(|n| n.label == rel.label && n.props.get(&rel.property) == Some(item))
                .map(|n| n.id);
            let from = match existing {
                Some(from) => from,
                None => {
                    let props = BTreeMap::from([(rel.property.clone(), item.clone())]);
                    self.create(&rel.label, props)
                }
            };
            let edge = Edge {
                from,
                rel_type: rel.rel_type.clone(),
                to: id,
            };
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
    }
}

/// Ascending with missing properties last, as Cypher orders nulls.
fn order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl Client<GraphQuery> for MemoryGraphStore {
    async fn run(&self, query: &GraphQuery) -> EngineResult<RawResult> {
        self.health.check(BackendKind::Graph).await?;
        let fail = |reason: String| EngineError::execution(BackendKind::Graph, reason);
        let params = &query.params;

        match &query.statement {
            Statement::Match {
                conditions,
                collect,
                order_by,
                skip,
                limit,
            } => {
                let graph = self.graph.read().await;
                let ids = graph.matching(&query.label, conditions, params).map_err(fail)?;
                let mut rows: Vec<GraphRow> = ids
                    .into_iter()
                    .filter_map(|id| graph.node(id))
                    .map(|node| {
                        let related = collect
                            .iter()
                            .map(|rel| {
                                let mut values = graph.related(node.id, rel);
                                values.dedup();
                                (rel.alias.clone(), values)
                            })
                            .collect();
                        GraphRow {
                            node: node.props.clone(),
                            related,
                        }
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    order_by
                        .iter()
                        .map(|prop| order(a.node.get(prop), b.node.get(prop)))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
                let rows = rows
                    .into_iter()
                    .skip(skip.unwrap_or(0) as usize)
                    .take(limit.map_or(usize::MAX, |n| n as usize))
                    .collect();
                Ok(RawResult::GraphRows(rows))
            }
            Statement::Merge { keys, set } => {
                let mut graph = self.graph.write().await;
                let mut key_props = BTreeMap::new();
                for (prop, param) in keys {
                    let value = params
                        .get(param)
                        .cloned()
                        .ok_or_else(|| fail(format!("parameter ${} is not bound", param)))?;
                    key_props.insert(prop.clone(), value);
                }
                let existing = graph
                    .nodes
                    .iter()
                    .find(|n| {
                        n.label == query.label
                            && key_props.iter().all(|(k, v)| n.props.get(k).is_some_and(|p| p.loosely_eq(v)))
                    })
                    .map(|n| n.id);
                let id = match existing {
                    Some(id) => id,
                    None => graph.create(&query.label, key_props),
                };
                graph.apply(id, set, params).map_err(fail)?;
                Ok(RawResult::Affected(1))
            }
            Statement::Set { conditions, set } => {
                let mut graph = self.graph.write().await;
                let ids = graph.matching(&query.label, conditions, params).map_err(fail)?;
                for id in &ids {
                    graph.apply(*id, set, params).map_err(fail)?;
                }
                Ok(RawResult::Affected(ids.len() as u64))
            }
            Statement::DetachDelete { conditions } => {
                let mut graph = self.graph.write().await;
                let ids: BTreeSet<u64> = graph
                    .matching(&query.label, conditions, params)
                    .map_err(fail)?
                    .into_iter()
                    .collect();
                graph.nodes.retain(|n| !ids.contains(&n.id));
                graph
                    .edges
                    .retain(|e| !ids.contains(&e.from) && !ids.contains(&e.to));
                Ok(RawResult::Affected(ids.len() as u64))
            }
            Statement::NodeProperties => {
                let graph = self.graph.read().await;
                let names: BTreeSet<String> = graph
                    .nodes
                    .iter()
                    .filter(|n| n.label == query.label)
                    .flat_map(|n| n.props.keys().cloned())
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
    use crate::transpiler::ToCypher;

    async fn run(store: &MemoryGraphStore, intent: Intent) -> RawResult {
        let query = intent.to_cypher(&movie_mapping(BackendKind::Graph)).unwrap();
        store.run(&query).await.unwrap()
    }

    #[tokio::test]
    async fn test_merge_links_people_once() {
        let store = MemoryGraphStore::new();
        let create = Intent::create("movies")
            .value("title", "Hook")
            .value("year", 1991)
            .value("director", vec!["Steven Spielberg"]);
        run(&store, create.clone()).await;
        run(&store, create).await;
        assert_eq!(store.node_count("Movie").await, 1);
        assert_eq!(store.node_count("Person").await, 1);

        let rows = run(&store, Intent::filter("movies").contains_ci("director", "SPIELBERG")).await;
        let RawResult::GraphRows(rows) = rows else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].related["director"], vec![Value::from("Steven Spielberg")]);
    }

    #[tokio::test]
    async fn test_update_replaces_relationships() {
        let store = MemoryGraphStore::new();
        run(
            &store,
            Intent::create("movies")
                .value("title", "Ghost")
                .value("year", 1990)
                .value("cast", vec!["Patrick Swayze", "Demi Moore"]),
        )
        .await;
        let affected = run(
            &store,
            Intent::update("movies")
                .eq("title", "Ghost")
                .eq("year", 1990)
                .set("cast", vec!["Whoopi Goldberg"]),
        )
        .await;
        assert_eq!(affected, RawResult::Affected(1));

        let RawResult::GraphRows(rows) = run(&store, Intent::filter("movies")).await else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].related["cast"], vec![Value::from("Whoopi Goldberg")]);
    }

    #[tokio::test]
    async fn test_detach_delete_and_properties() {
        let store = MemoryGraphStore::new();
        run(&store, Intent::create("movies").value("title", "Always").value("year", 1989)).await;
        let fields = run(&store, Intent::describe_schema("movies")).await;
        assert_eq!(fields, RawResult::Fields(vec!["title".to_string(), "year".to_string()]));

        let deleted = run(&store, Intent::delete("movies").eq("title", "Always").eq("year", 1989)).await;
        assert_eq!(deleted, RawResult::Affected(1));
        assert_eq!(store.node_count("Movie").await, 0);
    }
}
