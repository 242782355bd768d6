//! # polyq - One Intent, Five Databases
//!
//! > **Ask once. Compare everywhere.**
//!
//! polyq turns a canonical query intent into the native language of five
//! database families, runs it on each and hands back records of a single
//! shape, so the families can be compared side by side.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use polyq::prelude::*;
//!
//! let engine = Engine::in_memory(&EngineConfig::default()).await?;
//!
//! // Parse, translate and run on every backend
//! let outcome = engine
//!     .run("get::movies[director~'spielberg'i, year=1993]", Target::All)
//!     .await?;
//! for envelope in outcome.envelopes() {
//!     println!("{}: {} records", envelope.backend(), envelope.records().len());
//! }
//! ```
//!
//! ## Families
//!
//! | Backend       | Dialect             |
//! |---------------|---------------------|
//! | `document`    | MongoDB aggregation |
//! | `graph`       | Cypher              |
//! | `key-value`   | RediSearch          |
//! | `wide-column` | HBase shell         |
//! | `triple`      | SPARQL 1.1          |
//!
//! ## Symbology
//!
//! | Symbol   | Name     | Function                 |
//! |----------|----------|--------------------------|
//! | `::`     | Gate     | Defines the operation    |
//! | `[]`     | Cage     | Predicates or pagination |
//! | `~`      | Fuse     | Contains                 |
//! | `'..'i`  | Fold     | Ignore case              |
//! | `{}`     | Set      | In-set test              |

pub mod backend;
pub mod client;
pub mod compare;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod intent;
pub mod normalize;
pub mod parser;
pub mod schema;
pub mod seed;
pub mod source;
pub mod transpiler;
pub mod value;

pub mod prelude {
    pub use crate::backend::{Backend, BackendKind, SchemaDescription};
    pub use crate::compare::{Comparator, ComparisonReport, ComparisonSummary};
    pub use crate::config::EngineConfig;
    pub use crate::dispatch::Dispatcher;
    pub use crate::engine::{Engine, Outcome, Target};
    pub use crate::envelope::{ResultEnvelope, Status};
    pub use crate::error::*;
    pub use crate::intent::{Intent, Operation, Operator, Predicate};
    pub use crate::normalize::Record;
    pub use crate::parser::parse;
    pub use crate::schema::{SchemaProvider, StaticSchemaProvider, MOVIES};
    pub use crate::source::{IntentSource, JsonSource, StaticSource, SyntaxSource};
    pub use crate::transpiler::{NativeQuery, ToCypher, ToDocument, ToHBase, ToRediSearch, ToSparql};
    pub use crate::value::Value;
}

/// Parse compact syntax into an intent.
///
/// # Example
///
/// ```
/// use polyq::parse;
///
/// let intent = parse("get::movies[year=1993][lim=5]").unwrap();
/// assert_eq!(intent.entity, "movies");
/// assert_eq!(intent.pagination.limit, Some(5));
/// ```
pub fn parse(input: &str) -> error::EngineResult<intent::Intent> {
    parser::parse(input)
}
