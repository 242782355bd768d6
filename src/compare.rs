//! Cross-backend comparison.
//!
//! [`Comparator::compare_all`] sends one validated intent to every
//! registered backend at once, waits for all of them, aligns the record
//! shapes and summarizes latency and record-count agreement.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::BackendKind;
use crate::dispatch::Dispatcher;
use crate::envelope::ResultEnvelope;
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::normalize::align;

#[derive(Clone)]
pub struct Comparator {
    dispatcher: Arc<Dispatcher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub intent: Intent,
    /// One per backend, in canonical backend order.
    pub envelopes: Vec<ResultEnvelope>,
    pub summary: ComparisonSummary,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub total: usize,
    /// Success and partial envelopes.
    pub succeeded: usize,
    pub failed: usize,
    pub fastest: Option<BackendKind>,
    pub slowest: Option<BackendKind>,
    /// Sum of execute latencies.
    #[serde(rename = "total_elapsed_ms", serialize_with = "as_millis")]
    pub total_elapsed: Duration,
    /// Records returned (or rows affected) per non-failed backend.
    pub record_counts: BTreeMap<BackendKind, u64>,
    pub counts_agree: bool,
    /// Backends whose count differs from the most common one.
    pub divergent: Vec<BackendKind>,
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1000.0)
}

impl Comparator {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run `intent` on every registered backend concurrently.
    ///
    /// Only a malformed intent fails the whole comparison; backend faults
    /// stay inside their own envelope.
    pub async fn compare_all(&self, intent: &Intent) -> EngineResult<ComparisonReport> {
        self.dispatcher.validate(intent)?;
        let shared = Arc::new(intent.clone());

        let handles: Vec<_> = self
            .dispatcher
            .backends()
            .into_iter()
            .map(|kind| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let intent = Arc::clone(&shared);
                (kind, tokio::spawn(async move { dispatcher.dispatch(kind, &intent).await }))
            })
            .collect();

        let mut envelopes = Vec::with_capacity(handles.len());
        for (kind, handle) in handles {
            let envelope = match handle.await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(backend = %kind, "dispatch task failed: {}", e);
                    let error = EngineError::execution(kind, format!("dispatch task failed: {}", e));
                    ResultEnvelope::failure(kind, None, Duration::ZERO, &error)
                }
            };
            envelopes.push(envelope);
        }

        let envelopes = align(envelopes);
        let summary = ComparisonSummary::from_envelopes(&envelopes);
        info!(
            intent = %intent,
            succeeded = summary.succeeded,
            failed = summary.failed,
            counts_agree = summary.counts_agree,
            "comparison finished"
        );

        Ok(ComparisonReport {
            intent: intent.clone(),
            envelopes,
            summary,
            generated_at: Utc::now(),
        })
    }
}

impl ComparisonSummary {
    pub fn from_envelopes(envelopes: &[ResultEnvelope]) -> Self {
        let ok: Vec<&ResultEnvelope> = envelopes.iter().filter(|e| !e.is_error()).collect();

        let fastest = ok.iter().min_by_key(|e| e.elapsed()).map(|e| e.backend());
        let slowest = ok.iter().max_by_key(|e| e.elapsed()).map(|e| e.backend());
        let total_elapsed = envelopes.iter().map(|e| e.elapsed()).sum();

        let record_counts: BTreeMap<BackendKind, u64> = ok
            .iter()
            .map(|e| {
                let count = e.affected().unwrap_or(e.records().len() as u64);
                (e.backend(), count)
            })
            .collect();

        // Most frequent count; ties go to the count seen first.
        let mut frequency: Vec<(u64, usize)> = Vec::new();
        for count in record_counts.values() {
            match frequency.iter_mut().find(|(c, _)| c == count) {
                Some(slot) => slot.1 += 1,
                None => frequency.push((*count, 1)),
            }
        }
        let majority = frequency
            .iter()
            .fold(None, |best: Option<(u64, usize)>, &(c, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((c, n)),
            })
            .map(|(c, _)| c);
        let divergent: Vec<BackendKind> = record_counts
            .iter()
            .filter(|(_, count)| Some(**count) != majority)
            .map(|(kind, _)| *kind)
            .collect();

        Self {
            total: envelopes.len(),
            succeeded: ok.len(),
            failed: envelopes.len() - ok.len(),
            fastest,
            slowest,
            total_elapsed,
            counts_agree: divergent.is_empty(),
            record_counts,
            divergent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Record;
    use crate::schema::StaticSchemaProvider;
    use crate::value::Value;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::from_iter([("title".to_string(), Value::Int(i as i64))]))
            .collect()
    }

    fn ok(kind: BackendKind, n: usize, ms: u64) -> ResultEnvelope {
        ResultEnvelope::success(kind, records(n), None, String::new(), Duration::from_millis(ms))
    }

    #[test]
    fn test_summary_flags_divergence() {
        let envelopes = vec![
            ok(BackendKind::Document, 2, 5),
            ok(BackendKind::Graph, 2, 9),
            ok(BackendKind::KeyValue, 3, 1),
            ResultEnvelope::failure(
                BackendKind::Triple,
                None,
                Duration::from_millis(20),
                &EngineError::Timeout,
            ),
        ];
        let summary = ComparisonSummary::from_envelopes(&envelopes);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fastest, Some(BackendKind::KeyValue));
        assert_eq!(summary.slowest, Some(BackendKind::Graph));
        assert_eq!(summary.total_elapsed, Duration::from_millis(35));
        assert!(!summary.counts_agree);
        assert_eq!(summary.divergent, vec![BackendKind::KeyValue]);
    }

    #[test]
    fn test_summary_agreement() {
        let summary = ComparisonSummary::from_envelopes(&[
            ok(BackendKind::Document, 1, 1),
            ok(BackendKind::WideColumn, 1, 2),
        ]);
        assert!(summary.counts_agree);
        assert!(summary.divergent.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_intent_is_top_level_error() {
        let dispatcher = Dispatcher::in_memory(Arc::new(StaticSchemaProvider::movies()), &BackendKind::ALL);
        let comparator = Comparator::new(Arc::new(dispatcher));
        let err = comparator
            .compare_all(&Intent::update("movies").eq("title", "Hook"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedIntent(_)));
    }
}
