//! Engine configuration

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "POLYQ_CONFIG";

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Per-backend execution budget in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Backends to register
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendKind>,

    /// Whether to load the bundled movie dataset on startup
    #[serde(default = "default_true")]
    pub seed: bool,

    /// Mapping overrides, keyed by backend then canonical entity
    #[serde(default)]
    pub mappings: BTreeMap<String, BTreeMap<String, MappingOverride>>,
}

/// Overrides applied on top of a built-in mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingOverride {
    pub native_entity: Option<String>,
    /// Canonical field name to native field name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_timeout_ms() -> u64 { 5_000 }

fn default_backends() -> Vec<BackendKind> { BackendKind::ALL.to_vec() }

fn default_true() -> bool { true }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            backends: default_backends(),
            seed: true,
            mappings: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn from_toml(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        if config.timeout_ms == 0 {
            return Err(EngineError::Config("timeout_ms must be positive".to_string()));
        }
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `POLYQ_CONFIG` and then the
    /// user config directory are tried, falling back to defaults.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        tracing::debug!(path = %path.display(), "loading configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `<config dir>/polyq/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("polyq").join("config.toml"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn backends(mut self, backends: impl IntoIterator<Item = BackendKind>) -> Self {
        self.config.backends = backends.into_iter().collect();
        self
    }

    pub fn seed(mut self, seed: bool) -> Self {
        self.config.seed = seed;
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.backends.len(), 5);
        assert!(config.seed);
    }

    #[test]
    fn test_parse_backends_and_timeout() {
        let config = EngineConfig::from_toml(
            r#"
            timeout_ms = 250
            backends = ["document", "key-value"]
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.backends, vec![BackendKind::Document, BackendKind::KeyValue]);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(EngineConfig::from_toml("timeout_ms = 0").is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/polyq.toml"))).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder().timeout_ms(10).seed(false).build();
        assert_eq!(config.timeout_ms, 10);
        assert!(!config.seed);
    }
}
