//! Document-store translation (MongoDB dialect).
//!
//! Reads become an aggregation pipeline whose first stage is the filter;
//! writes become `updateOne`/`updateMany`/`deleteMany` commands.

use serde_json::{json, Map, Value as Json};
use std::fmt;

use super::{Assignment, Bound, Plan};
use crate::error::EngineResult;
use crate::intent::{Intent, Operation, Operator};
use crate::schema::FieldMapping;
use crate::value::Value;

/// Documents sampled to infer a collection's fields.
pub const SAMPLE_SIZE: u64 = 100;

pub trait ToDocument {
    fn to_document(&self, mapping: &FieldMapping) -> EngineResult<DocumentQuery>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub command: DocumentCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    Aggregate { pipeline: Vec<Json> },
    /// `updateOne(filter, {$set}, {upsert: true})`
    Upsert { filter: Json, set: Json },
    UpdateMany { filter: Json, set: Json },
    DeleteMany { filter: Json },
    /// Sample documents and report the field paths they carry.
    InferSchema { sample_size: u64 },
}

impl DocumentQuery {
    /// The filter mapping: the `$match` stage of a read, or a write's filter.
    pub fn filter(&self) -> Json {
        match &self.command {
            DocumentCommand::Aggregate { pipeline } => pipeline
                .iter()
                .find_map(|stage| stage.get("$match").cloned())
                .unwrap_or_else(|| json!({})),
            DocumentCommand::Upsert { filter, .. }
            | DocumentCommand::UpdateMany { filter, .. }
            | DocumentCommand::DeleteMany { filter } => filter.clone(),
            DocumentCommand::InferSchema { .. } => json!({}),
        }
    }
}

impl ToDocument for Intent {
    fn to_document(&self, mapping: &FieldMapping) -> EngineResult<DocumentQuery> {
        let plan = Plan::new(self, mapping)?;

        let command = match plan.operation {
            Operation::Filter | Operation::ReadByKey => DocumentCommand::Aggregate {
                pipeline: build_pipeline(&plan),
            },
            Operation::Create => {
                let natives = plan.identity_natives();
                let mut filter = Map::new();
                for a in plan.assignments.iter().filter(|a| natives.contains(&a.native())) {
                    filter.insert(a.native().to_string(), a.value.to_json());
                }
                DocumentCommand::Upsert {
                    filter: Json::Object(filter),
                    set: build_set(&plan.assignments),
                }
            }
            Operation::Update => DocumentCommand::UpdateMany {
                filter: build_filter(&plan.predicates),
                set: build_set(&plan.assignments),
            },
            Operation::Delete => DocumentCommand::DeleteMany {
                filter: build_filter(&plan.predicates),
            },
            Operation::DescribeSchema => DocumentCommand::InferSchema {
                sample_size: SAMPLE_SIZE,
            },
        };

        Ok(DocumentQuery {
            collection: mapping.native_entity.clone(),
            command,
        })
    }
}

fn build_pipeline(plan: &Plan) -> Vec<Json> {
    let mut stages = Vec::new();

    let filter = build_filter(&plan.predicates);
    if filter.as_object().is_some_and(|f| !f.is_empty()) {
        stages.push(json!({ "$match": filter }));
    }

    let mut sort = Map::new();
    for native in plan.identity_natives() {
        sort.insert(native.to_string(), json!(1));
    }
    stages.push(json!({ "$sort": sort }));

    if let Some(offset) = plan.pagination.offset {
        stages.push(json!({ "$skip": offset }));
    }
    if let Some(limit) = plan.pagination.limit {
        stages.push(json!({ "$limit": limit }));
    }
    stages
}

/// AND of all predicates. A field named twice moves everything under `$and`.
fn build_filter(predicates: &[Bound]) -> Json {
    let clauses: Vec<(String, Json)> = predicates
        .iter()
        .map(|p| (p.native().to_string(), condition(p)))
        .collect();

    let mut names: Vec<&str> = clauses.iter().map(|(n, _)| n.as_str()).collect();
    names.sort();
    names.dedup();

    if names.len() == clauses.len() {
        Json::Object(clauses.into_iter().collect())
    } else {
        let parts: Vec<Json> = clauses
            .into_iter()
            .map(|(name, cond)| {
                let mut part = Map::new();
                part.insert(name, cond);
                Json::Object(part)
            })
            .collect();
        json!({ "$and": parts })
    }
}

fn condition(p: &Bound) -> Json {
    let text = |v: &Value| v.as_str().map(regex::escape).unwrap_or_else(|| v.to_string());
    match p.operator {
        Operator::Equals if p.fold => {
            json!({ "$regex": format!("^{}$", text(p.value)), "$options": "i" })
        }
        Operator::Equals => p.value.to_json(),
        Operator::Contains => {
            let mut cond = json!({ "$regex": text(p.value) });
            if p.fold {
                cond["$options"] = json!("i");
            }
            cond
        }
        Operator::GreaterThan => json!({ "$gt": p.value.to_json() }),
        Operator::LessThan => json!({ "$lt": p.value.to_json() }),
        Operator::InSet if p.fold => {
            let alternatives: Vec<String> = p.operands().into_iter().map(text).collect();
            json!({ "$regex": format!("^(?:{})$", alternatives.join("|")), "$options": "i" })
        }
        Operator::InSet => json!({ "$in": p.value.to_json() }),
    }
}

fn build_set(assignments: &[Assignment]) -> Json {
    let mut set = Map::new();
    for a in assignments {
        set.insert(a.native().to_string(), a.value.to_json());
    }
    Json::Object(set)
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            DocumentCommand::Aggregate { pipeline } => {
                let stages: Vec<String> = pipeline.iter().map(|s| s.to_string()).collect();
                write!(f, "db.{}.aggregate([{}])", self.collection, stages.join(", "))
            }
            DocumentCommand::Upsert { filter, set } => write!(
                f,
                "db.{}.updateOne({}, {}, {})",
                self.collection,
                filter,
                json!({ "$set": set }),
                json!({ "upsert": true })
            ),
            DocumentCommand::UpdateMany { filter, set } => write!(
                f,
                "db.{}.updateMany({}, {})",
                self.collection,
                filter,
                json!({ "$set": set })
            ),
            DocumentCommand::DeleteMany { filter } => {
                write!(f, "db.{}.deleteMany({})", self.collection, filter)
            }
            DocumentCommand::InferSchema { sample_size } => write!(
                f,
                "db.{}.aggregate([{}])",
                self.collection,
                json!({ "$sample": { "size": sample_size } })
            ),
        }
    }
}
