//! Result envelopes: one per backend per dispatched intent.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{EngineError, ErrorKind};
use crate::normalize::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    /// Some raw records could not be normalized and were left out.
    Partial,
    Error,
}

/// Outcome of running one intent against one backend.
///
/// Envelopes are immutable once built; accessors only borrow.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    backend: BackendKind,
    status: Status,
    records: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    affected: Option<u64>,
    native_query: Option<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    executed_at: DateTime<Utc>,
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1000.0)
}

impl ResultEnvelope {
    pub fn success(
        backend: BackendKind,
        records: Vec<Record>,
        affected: Option<u64>,
        native_query: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            backend,
            status: Status::Success,
            records,
            affected,
            native_query: Some(native_query),
            elapsed,
            error_kind: None,
            error_detail: None,
            executed_at: Utc::now(),
        }
    }

    /// Records were returned but `skipped` raw records were dropped.
    pub fn partial(
        backend: BackendKind,
        records: Vec<Record>,
        native_query: String,
        elapsed: Duration,
        skipped: &[String],
    ) -> Self {
        Self {
            status: Status::Partial,
            error_detail: Some(format!(
                "{} record(s) skipped: {}",
                skipped.len(),
                skipped.join("; ")
            )),
            ..Self::success(backend, records, None, native_query, elapsed)
        }
    }

    pub fn failure(
        backend: BackendKind,
        native_query: Option<String>,
        elapsed: Duration,
        error: &EngineError,
    ) -> Self {
        Self {
            backend,
            status: Status::Error,
            records: vec![],
            affected: None,
            native_query,
            elapsed,
            error_kind: Some(error.kind()),
            error_detail: Some(error.to_string()),
            executed_at: Utc::now(),
        }
    }

    /// Same envelope with its records replaced.
    pub(crate) fn with_records(self, records: Vec<Record>) -> Self {
        Self { records, ..self }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Rows touched by a mutation, when the backend reports it.
    pub fn affected(&self) -> Option<u64> {
        self.affected
    }

    /// Native query text, absent when translation failed.
    pub fn native_query(&self) -> Option<&str> {
        self.native_query.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn executed_at(&self) -> DateTime<Utc> {
        self.executed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope() {
        let envelope = ResultEnvelope::failure(
            BackendKind::Graph,
            Some("MATCH (m:Movie) RETURN m".to_string()),
            Duration::from_millis(5),
            &EngineError::Timeout,
        );
        assert!(envelope.is_error());
        assert!(envelope.records().is_empty());
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(envelope.error_detail(), Some("timeout"));
    }

    #[test]
    fn test_partial_envelope() {
        let envelope = ResultEnvelope::partial(
            BackendKind::KeyValue,
            vec![Record::new()],
            "FT.SEARCH idx:movies \"*\"".to_string(),
            Duration::ZERO,
            &["movie:x has no 'year'".to_string()],
        );
        assert_eq!(envelope.status(), Status::Partial);
        assert_eq!(envelope.records().len(), 1);
        assert!(envelope.error_detail().unwrap().contains("1 record(s) skipped"));
    }

    #[test]
    fn test_serializes_to_json() {
        let envelope = ResultEnvelope::success(
            BackendKind::Document,
            vec![],
            Some(1),
            "db.movies.deleteMany({})".to_string(),
            Duration::from_millis(2),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["backend"], "document");
        assert_eq!(json["status"], "success");
        assert_eq!(json["affected"], 1);
        assert!(json.get("error_kind").is_none());
    }
}
