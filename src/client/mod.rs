//! Database clients.
//!
//! A client runs an already-translated native query and hands back the
//! family's raw result shape. Adapters hold clients behind
//! `Arc<dyn Client<Q>>`, so a networked driver can replace the bundled
//! in-memory stores without touching translation or normalization.

pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::value::Value;

/// Executes native queries of type `Q`.
#[async_trait]
pub trait Client<Q: Sync>: Send + Sync {
    async fn run(&self, query: &Q) -> EngineResult<RawResult>;
}

/// One matched graph node with its collected relationship values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphRow {
    pub node: BTreeMap<String, Value>,
    /// Collected values keyed by return alias.
    pub related: BTreeMap<String, Vec<Value>>,
}

/// One hash as returned by a key-value search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashEntry {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

/// One wide-column row; cells keyed by `family:qualifier`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideRow {
    pub row_key: String,
    pub cells: BTreeMap<String, Value>,
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Iri(String),
    Literal(Value),
}

impl Term {
    /// The literal value, or the IRI as text.
    pub fn to_value(&self) -> Value {
        match self {
            Term::Iri(iri) => Value::Text(iri.clone()),
            Term::Literal(v) => v.clone(),
        }
    }
}

/// One SPARQL solution row.
pub type Binding = BTreeMap<String, Term>;

/// What a client hands back, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Documents(Vec<serde_json::Map<String, serde_json::Value>>),
    GraphRows(Vec<GraphRow>),
    Hashes(Vec<HashEntry>),
    Rows(Vec<WideRow>),
    Bindings(Vec<Binding>),
    /// Mutation count.
    Affected(u64),
    /// Stored field names, from a schema query.
    Fields(Vec<String>),
}

impl RawResult {
    pub fn affected(&self) -> Option<u64> {
        match self {
            RawResult::Affected(n) => Some(*n),
            _ => None,
        }
    }
}
