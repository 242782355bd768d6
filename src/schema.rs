//! Entity schemas and per-backend field mappings.
//!
//! Canonical field names are what intents and normalized records speak.
//! A [`FieldMapping`] binds each canonical field to the name (or path) a
//! given backend stores it under, together with its type.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::backend::BackendKind;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Canonical entity the engine ships mappings for.
pub const MOVIES: &str = "movies";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    TextList,
}

impl FieldType {
    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::TextList)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    /// Whether a scalar value can be compared against this field.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Text | FieldType::TextList, Value::Text(_)) => true,
            (FieldType::Integer, Value::Int(_)) => true,
            (FieldType::Integer, Value::Float(f)) => f.fract() == 0.0,
            (FieldType::Float, Value::Int(_) | Value::Float(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::TextList => "text-list",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub canonical: String,
    pub native: String,
    pub field_type: FieldType,
}

/// How one backend stores one canonical entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub entity: String,
    pub native_entity: String,
    /// Canonical fields that together identify one record.
    pub identity: Vec<String>,
    /// Bindings in canonical order.
    pub fields: Vec<FieldBinding>,
}

impl FieldMapping {
    pub fn binding(&self, canonical: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|b| b.canonical == canonical)
    }

    /// Look up a canonical field, failing for fields the entity does not have.
    pub fn require(&self, canonical: &str) -> EngineResult<&FieldBinding> {
        self.binding(canonical).ok_or_else(|| {
            EngineError::invalid_predicate(
                canonical,
                format!("'{}' has no field named '{}'", self.entity, canonical),
            )
        })
    }

    pub fn by_native(&self, native: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|b| b.native == native)
    }

    pub fn identity_bindings(&self) -> impl Iterator<Item = &FieldBinding> {
        self.identity.iter().filter_map(|f| self.binding(f))
    }

    /// Rebind a canonical field to a different native name.
    pub fn with_native(mut self, canonical: &str, native: impl Into<String>) -> EngineResult<Self> {
        let entity = self.entity.clone();
        let binding = self
            .fields
            .iter_mut()
            .find(|b| b.canonical == canonical)
            .ok_or_else(|| EngineError::Config(format!("'{}' has no field named '{}'", entity, canonical)))?;
        binding.native = native.into();
        Ok(self)
    }
}

/// Canonical movie fields, in canonical order.
pub fn movie_fields() -> [(&'static str, FieldType); 6] {
    [
        ("title", FieldType::Text),
        ("year", FieldType::Integer),
        ("genre", FieldType::TextList),
        ("director", FieldType::TextList),
        ("cast", FieldType::TextList),
        ("rating", FieldType::Float),
    ]
}

/// Built-in movie mapping for a backend.
pub fn movie_mapping(kind: BackendKind) -> FieldMapping {
    let (native_entity, natives): (&str, [&str; 6]) = match kind {
        BackendKind::Document => (
            "movies",
            ["title", "year", "genres", "directors", "cast", "imdb.rating"],
        ),
        BackendKind::Graph => (
            "Movie",
            [
                "title",
                "year",
                "genres",
                "<-DIRECTED-Person.name",
                "<-ACTED_IN-Person.name",
                "imdb_rating",
            ],
        ),
        BackendKind::KeyValue => (
            "idx:movies",
            ["title", "year", "genre", "director", "cast", "rating"],
        ),
        BackendKind::WideColumn => (
            "movies",
            [
                "info:title",
                "info:year",
                "metadata:genres",
                "people:directors",
                "people:cast",
                "ratings:imdb_rating",
            ],
        ),
        BackendKind::Triple => (
            "ex:Movie",
            [
                "ex:title",
                "ex:year",
                "ex:hasGenre/ex:name",
                "ex:directedBy/ex:name",
                "ex:starring/ex:name",
                "ex:imdbRating",
            ],
        ),
    };

    FieldMapping {
        entity: MOVIES.to_string(),
        native_entity: native_entity.to_string(),
        identity: vec!["title".to_string(), "year".to_string()],
        fields: movie_fields()
            .iter()
            .zip(natives)
            .map(|((canonical, field_type), native)| FieldBinding {
                canonical: canonical.to_string(),
                native: native.to_string(),
                field_type: *field_type,
            })
            .collect(),
    }
}

/// Resolves the mapping a backend uses for an entity.
///
/// Mappings are looked up on every dispatch, so a provider backed by
/// mutable configuration takes effect without rebuilding adapters.
pub trait SchemaProvider: Send + Sync {
    fn mapping(&self, backend: BackendKind, entity: &str) -> EngineResult<FieldMapping>;
}

/// In-memory mapping table.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    mappings: HashMap<(BackendKind, String), FieldMapping>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in movie mappings for all five backends.
    pub fn movies() -> Self {
        let mut provider = Self::new();
        for kind in BackendKind::ALL {
            provider.insert(kind, movie_mapping(kind));
        }
        provider
    }

    /// Built-in mappings with configured overrides applied.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let mut provider = Self::movies();
        for (backend, entities) in &config.mappings {
            let kind: BackendKind = backend.parse().map_err(EngineError::Config)?;
            for (entity, overrides) in entities {
                let mut mapping = provider
                    .mappings
                    .get(&(kind, entity.clone()))
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::Config(format!("no built-in mapping for entity '{}'", entity))
                    })?;
                if let Some(native_entity) = &overrides.native_entity {
                    mapping.native_entity = native_entity.clone();
                }
                for (canonical, native) in &overrides.fields {
                    mapping = mapping.with_native(canonical, native.clone())?;
                }
                provider.insert(kind, mapping);
            }
        }
        Ok(provider)
    }

    pub fn insert(&mut self, backend: BackendKind, mapping: FieldMapping) {
        self.mappings.insert((backend, mapping.entity.clone()), mapping);
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn mapping(&self, backend: BackendKind, entity: &str) -> EngineResult<FieldMapping> {
        self.mappings
            .get(&(backend, entity.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::unsupported(backend, format!("entity '{}' is not mapped", entity))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_every_backend_maps_every_field() {
        for kind in BackendKind::ALL {
            let mapping = movie_mapping(kind);
            assert_eq!(mapping.fields.len(), 6);
            assert_eq!(mapping.identity_bindings().count(), 2);
        }
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::Float.accepts(&Value::Int(8)));
        assert!(FieldType::Integer.accepts(&Value::Float(1990.0)));
        assert!(!FieldType::Integer.accepts(&Value::from("1990")));
        assert!(FieldType::TextList.accepts(&Value::from("Drama")));
    }

    #[test]
    fn test_unknown_field() {
        let mapping = movie_mapping(BackendKind::Document);
        let err = mapping.require("budget").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPredicateType);
    }

    #[test]
    fn test_unmapped_entity() {
        let provider = StaticSchemaProvider::movies();
        let err = provider.mapping(BackendKind::Graph, "users").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(provider.mapping(BackendKind::Graph, MOVIES).is_ok());
    }

    #[test]
    fn test_overrides_from_config() {
        let config = EngineConfig::from_toml(
            r#"
            [mappings.document.movies]
            native_entity = "films"
            fields = { rating = "score" }
            "#,
        )
        .unwrap();
        let provider = StaticSchemaProvider::from_config(&config).unwrap();
        let mapping = provider.mapping(BackendKind::Document, MOVIES).unwrap();
        assert_eq!(mapping.native_entity, "films");
        assert_eq!(mapping.binding("rating").unwrap().native, "score");
    }
}
