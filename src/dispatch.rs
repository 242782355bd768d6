//! Execution dispatcher: one intent, one backend, one envelope.
//!
//! The dispatcher owns the adapter registry and the schema provider. Each
//! call resolves the field mapping afresh, translates, executes under the
//! configured timeout and normalizes. Only `execute` is timed. Every
//! failure ends up inside the returned envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::{self, Backend, BackendKind};
use crate::config::EngineConfig;
use crate::envelope::ResultEnvelope;
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::schema::{FieldMapping, SchemaProvider, StaticSchemaProvider};
use crate::transpiler::NativeQuery;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    backends: BTreeMap<BackendKind, Arc<dyn Backend>>,
    schema: Arc<dyn SchemaProvider>,
    timeout: Duration,
}

impl Dispatcher {
    /// An empty registry; add adapters with [`Dispatcher::register`].
    pub fn new(schema: Arc<dyn SchemaProvider>) -> Self {
        Self {
            backends: BTreeMap::new(),
            schema,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Fresh in-memory adapters for `kinds`.
    pub fn in_memory(schema: Arc<dyn SchemaProvider>, kinds: &[BackendKind]) -> Self {
        kinds
            .iter()
            .fold(Self::new(schema), |d, kind| d.with_backend(backend::in_memory(*kind)))
    }

    /// In-memory adapters for the configured backends, mappings and timeout.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let schema = Arc::new(StaticSchemaProvider::from_config(config)?);
        Ok(Self::in_memory(schema, &config.backends).with_timeout(config.timeout()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    /// Add or replace the adapter for the backend's kind.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.kind(), backend);
    }

    /// Registered kinds in canonical order.
    pub fn backends(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    pub fn backend(&self, kind: BackendKind) -> EngineResult<&Arc<dyn Backend>> {
        self.backends
            .get(&kind)
            .ok_or_else(|| EngineError::unavailable(kind, "backend is not enabled"))
    }

    pub fn schema(&self) -> &Arc<dyn SchemaProvider> {
        &self.schema
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Structural and identity checks that hold for every backend.
    ///
    /// Identity fields come from each registered backend's mapping of the
    /// entity; backends that do not map it are left to fail on dispatch.
    pub fn validate(&self, intent: &Intent) -> EngineResult<()> {
        intent.validate()?;
        for kind in self.backends.keys() {
            if let Ok(mapping) = self.schema.mapping(*kind, &intent.entity) {
                intent.validate_identity(&mapping.identity)?;
            }
        }
        Ok(())
    }

    /// Translate without executing.
    pub fn translate(&self, kind: BackendKind, intent: &Intent) -> EngineResult<NativeQuery> {
        intent.validate()?;
        let backend = self.backend(kind)?;
        let mapping = self.schema.mapping(kind, &intent.entity)?;
        backend.translate(intent, &mapping)
    }

    /// Run `intent` on one backend. Never fails; errors become the envelope.
    pub async fn dispatch(&self, kind: BackendKind, intent: &Intent) -> ResultEnvelope {
        let envelope = self.run(kind, intent).await;
        if let Some(detail) = envelope.error_detail().filter(|_| envelope.is_error()) {
            warn!(backend = %kind, "{}", detail);
        }
        envelope
    }

    async fn run(&self, kind: BackendKind, intent: &Intent) -> ResultEnvelope {
        let (backend, mapping, query) = match self.prepare(kind, intent) {
            Ok(prepared) => prepared,
            Err(e) => return ResultEnvelope::failure(kind, None, Duration::ZERO, &e),
        };
        let native = query.to_string();
        debug!(backend = %kind, query = %native, "executing");

        let started = Instant::now();
        let raw = tokio::time::timeout(self.timeout, backend.execute(&query)).await;
        let elapsed = started.elapsed();

        let raw = match raw {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return ResultEnvelope::failure(kind, Some(native), elapsed, &e),
            Err(_) => {
                return ResultEnvelope::failure(kind, Some(native), elapsed, &EngineError::Timeout);
            }
        };
        let affected = raw.affected();

        match backend.normalize(raw, &mapping) {
            Ok(out) if out.skipped.is_empty() => {
                debug!(backend = %kind, records = out.records.len(), ?elapsed, "normalized");
                ResultEnvelope::success(kind, out.records, affected, native, elapsed)
            }
            Ok(out) => ResultEnvelope::partial(kind, out.records, native, elapsed, &out.skipped),
            Err(e) => ResultEnvelope::failure(kind, Some(native), elapsed, &e),
        }
    }

    fn prepare(
        &self,
        kind: BackendKind,
        intent: &Intent,
    ) -> EngineResult<(Arc<dyn Backend>, FieldMapping, NativeQuery)> {
        intent.validate()?;
        let backend = self.backend(kind)?.clone();
        let mapping = self.schema.mapping(kind, &intent.entity)?;
        let query = backend.translate(intent, &mapping)?;
        Ok((backend, mapping, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Status;
    use crate::error::ErrorKind;

    fn dispatcher() -> Dispatcher {
        Dispatcher::in_memory(Arc::new(StaticSchemaProvider::movies()), &BackendKind::ALL)
    }

    #[tokio::test]
    async fn test_translation_error_is_captured() {
        let envelope = dispatcher()
            .dispatch(BackendKind::Graph, &Intent::filter("movies").contains("year", "199"))
            .await;
        assert_eq!(envelope.status(), Status::Error);
        assert_eq!(envelope.error_kind(), Some(ErrorKind::InvalidPredicateType));
        assert_eq!(envelope.native_query(), None);
        assert_eq!(envelope.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_mutation_reports_affected() {
        let d = dispatcher();
        let create = Intent::create("movies").value("title", "Inception").value("year", 2010);
        let envelope = d.dispatch(BackendKind::KeyValue, &create).await;
        assert!(envelope.is_success());
        assert_eq!(envelope.affected(), Some(1));
        assert!(envelope.records().is_empty());
        assert_eq!(
            envelope.native_query(),
            Some("HSET movies:Inception!e2010 title Inception title_lc inception year 2010")
        );
    }

    #[test]
    fn test_validate_checks_identity() {
        let d = dispatcher();
        let err = d
            .validate(&Intent::read_by_key("movies").eq("title", "Hook"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIntent);
        assert!(d.validate(&Intent::read_by_key("movies").eq("title", "Hook").eq("year", 1991)).is_ok());
        // Unmapped entities are reported per backend, not here.
        assert!(d.validate(&Intent::filter("albums")).is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_backend() {
        let d = Dispatcher::in_memory(Arc::new(StaticSchemaProvider::movies()), &[BackendKind::Document]);
        assert_eq!(d.backends(), vec![BackendKind::Document]);
        let envelope = d.dispatch(BackendKind::Triple, &Intent::filter("movies")).await;
        assert_eq!(envelope.error_kind(), Some(ErrorKind::BackendUnavailable));
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let envelope = dispatcher()
            .dispatch(BackendKind::Document, &Intent::filter("albums"))
            .await;
        assert_eq!(envelope.error_kind(), Some(ErrorKind::UnsupportedOperation));
    }
}
