//! In-memory stores standing in for the five databases.
//!
//! Each store executes the structured native query of its family with that
//! family's matching rules (regexes for documents, TAG semantics for
//! hashes, and so on), so results differ across backends the same way
//! real engines do.

pub mod document;
pub mod graph;
pub mod keyvalue;
pub mod triple;
pub mod widecolumn;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};
use crate::intent::Operator;
use crate::value::Value;

pub use document::MemoryDocumentStore;
pub use graph::MemoryGraphStore;
pub use keyvalue::MemoryKeyValueStore;
pub use triple::MemoryTripleStore;
pub use widecolumn::MemoryWideColumnStore;

/// Availability and latency knobs shared by the in-memory stores.
#[derive(Debug, Default)]
pub struct Health {
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl Health {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay added before every query.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) async fn check(&self, backend: BackendKind) -> EngineResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::unavailable(backend, "connection refused"));
        }
        Ok(())
    }
}

/// Whether any stored value satisfies `operator` against `operand`.
///
/// For in-set, `operand` is the list of accepted values.
pub(crate) fn matches_any(stored: &[Value], operator: Operator, operand: &Value, fold: bool) -> bool {
    stored
        .iter()
        .any(|candidate| matches_one(candidate, operator, operand, fold))
}

fn matches_one(candidate: &Value, operator: Operator, operand: &Value, fold: bool) -> bool {
    let text = |v: &Value| {
        let s = v.to_string();
        if fold { s.to_lowercase() } else { s }
    };
    let equal = |a: &Value, b: &Value| match (a, b) {
        (Value::Text(_), Value::Text(_)) => text(a) == text(b),
        _ => a.loosely_eq(b),
    };

    match operator {
        Operator::Equals => equal(candidate, operand),
        Operator::Contains => match candidate {
            Value::Text(_) => text(candidate).contains(&text(operand)),
            _ => false,
        },
        Operator::GreaterThan => candidate
            .compare(operand)
            .is_some_and(|o| o == std::cmp::Ordering::Greater),
        Operator::LessThan => candidate
            .compare(operand)
            .is_some_and(|o| o == std::cmp::Ordering::Less),
        Operator::InSet => operand.elements().into_iter().any(|item| equal(candidate, item)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_store_refuses() {
        let health = Health::default();
        assert!(health.check(BackendKind::Graph).await.is_ok());
        health.set_offline(true);
        let err = health.check(BackendKind::Graph).await.unwrap_err();
        assert!(matches!(err, EngineError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_matches_any() {
        let names = vec![Value::from("Steven Spielberg"), Value::from("Kathleen Kennedy")];
        assert!(matches_any(&names, Operator::Contains, &Value::from("spielberg"), true));
        assert!(!matches_any(&names, Operator::Contains, &Value::from("spielberg"), false));
        assert!(matches_any(
            &[Value::Int(1990)],
            Operator::InSet,
            &Value::from(vec![1989, 1990]),
            false
        ));
        assert!(matches_any(&[Value::Float(8.7)], Operator::GreaterThan, &Value::Int(8), false));
    }
}
