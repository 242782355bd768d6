//! Execution engine for polyq.
//!
//! Ties an [`IntentSource`] to the dispatcher and comparator: free text in,
//! one envelope or a full comparison report out.

use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{BackendKind, SchemaDescription};
use crate::compare::{Comparator, ComparisonReport};
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::envelope::ResultEnvelope;
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::seed;
use crate::source::{IntentSource, SyntaxSource};
use crate::transpiler::NativeQuery;

/// Where an intent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Backend(BackendKind),
    All,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Single(ResultEnvelope),
    Comparison(ComparisonReport),
}

impl Outcome {
    /// Every envelope, whether one or a comparison's worth.
    pub fn envelopes(&self) -> Vec<&ResultEnvelope> {
        match self {
            Outcome::Single(envelope) => vec![envelope],
            Outcome::Comparison(report) => report.envelopes.iter().collect(),
        }
    }
}

/// An engine over a set of backends.
#[derive(Clone)]
pub struct Engine {
    source: Arc<dyn IntentSource>,
    comparator: Comparator,
}

impl Engine {
    pub fn new(source: Arc<dyn IntentSource>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            source,
            comparator: Comparator::new(dispatcher),
        }
    }

    /// In-memory backends built from `config`, seeded unless `seed = false`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let engine = Engine::in_memory(&EngineConfig::default()).await?;
    /// let outcome = engine.run("get::movies[year=1993]", Target::All).await?;
    /// ```
    pub async fn in_memory(config: &EngineConfig) -> EngineResult<Self> {
        let dispatcher = Dispatcher::from_config(config)?;
        if config.seed {
            seed::load_all(&dispatcher).await?;
        }
        Ok(Self::new(Arc::new(SyntaxSource), Arc::new(dispatcher)))
    }

    pub fn with_source(mut self, source: Arc<dyn IntentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.comparator.dispatcher()
    }

    /// Infer an intent from `text` and run it.
    pub async fn run(&self, text: &str, target: Target) -> EngineResult<Outcome> {
        let intent = self.source.infer(text).await?;
        debug!(text, intent = %intent, "inferred intent");
        self.run_intent(&intent, target).await
    }

    /// Run an intent. A malformed intent fails here without touching any backend.
    pub async fn run_intent(&self, intent: &Intent, target: Target) -> EngineResult<Outcome> {
        self.dispatcher().validate(intent)?;
        match target {
            Target::Backend(kind) => {
                info!(backend = %kind, intent = %intent, "dispatching");
                Ok(Outcome::Single(self.dispatcher().dispatch(kind, intent).await))
            }
            Target::All => Ok(Outcome::Comparison(self.comparator.compare_all(intent).await?)),
        }
    }

    /// Translate for every registered backend without executing.
    pub fn explain(&self, intent: &Intent) -> Vec<(BackendKind, EngineResult<NativeQuery>)> {
        let dispatcher = self.dispatcher();
        dispatcher
            .backends()
            .into_iter()
            .map(|kind| (kind, dispatcher.translate(kind, intent)))
            .collect()
    }

    /// Describe how `kind` stores `entity`.
    pub async fn describe(&self, kind: BackendKind, entity: &str) -> EngineResult<SchemaDescription> {
        let dispatcher = self.dispatcher();
        let mapping = dispatcher.schema().mapping(kind, entity)?;
        let backend = dispatcher.backend(kind)?;
        tokio::time::timeout(dispatcher.timeout(), backend.describe_schema(&mapping))
            .await
            .unwrap_or(Err(EngineError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::MOVIES;

    async fn engine() -> Engine {
        Engine::in_memory(&EngineConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_run_single() {
        let outcome = engine()
            .await
            .run("get::movies[year=1993][lim=1]", Target::Backend(BackendKind::Document))
            .await
            .unwrap();
        let Outcome::Single(envelope) = outcome else {
            panic!("expected a single envelope");
        };
        assert_eq!(envelope.records().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_top_level() {
        let err = engine()
            .await
            .run("get::movies[year=1990 | year=1991]", Target::All)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIntent);
    }

    #[tokio::test]
    async fn test_missing_identity_is_top_level() {
        let engine = engine().await;
        let partial_key = Intent::read_by_key(MOVIES).eq("title", "Hook");
        for target in [Target::All, Target::Backend(BackendKind::Graph)] {
            let err = engine.run_intent(&partial_key, target).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedIntent);
        }
    }

    #[tokio::test]
    async fn test_explain_reports_each_backend() {
        let explained = engine()
            .await
            .explain(&Intent::filter(MOVIES).eq("year", 1990).offset(5));
        assert_eq!(explained.len(), 5);
        let failed: Vec<BackendKind> = explained
            .iter()
            .filter(|(_, q)| q.is_err())
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(failed, vec![BackendKind::WideColumn]);
    }

    #[tokio::test]
    async fn test_describe_uses_stored_fields() {
        let description = engine().await.describe(BackendKind::Document, MOVIES).await.unwrap();
        assert_eq!(description.fields.len(), 7);
        assert_eq!(description.fields[6].native, "_id");
    }
}
