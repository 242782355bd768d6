//! Intent sources: where intents come from before the engine sees them.
//!
//! A language model answering a free-text request is the usual source in
//! production; [`JsonSource`] decodes its reply. [`SyntaxSource`] reads the
//! compact syntax and [`StaticSource`] replays fixed intents for tests.
//! Every source validates what it produces, so a bad reply surfaces as
//! `MalformedIntent` before any backend is touched.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::parser;

#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn infer(&self, text: &str) -> EngineResult<Intent>;
}

/// Compact syntax such as `get::movies[year=1990]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxSource;

#[async_trait]
impl IntentSource for SyntaxSource {
    async fn infer(&self, text: &str) -> EngineResult<Intent> {
        let intent = parser::parse(text)?;
        intent.validate()?;
        Ok(intent)
    }
}

/// A JSON intent, possibly wrapped in markdown fences or prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSource;

impl JsonSource {
    pub fn decode(text: &str) -> EngineResult<Intent> {
        let json = extract_json(text)
            .ok_or_else(|| EngineError::malformed("no JSON object found in intent source output"))?;
        let intent: Intent = serde_json::from_str(json)
            .map_err(|e| EngineError::malformed(format!("intent JSON: {}", e)))?;
        intent.validate()?;
        Ok(intent)
    }
}

#[async_trait]
impl IntentSource for JsonSource {
    async fn infer(&self, text: &str) -> EngineResult<Intent> {
        Self::decode(text)
    }
}

/// The JSON object inside a model reply: a fenced block if present,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            let fenced = body[..end].trim();
            if fenced.starts_with('{') {
                return Some(fenced);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Fixed text-to-intent answers; unknown text is malformed.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    answers: HashMap<String, Intent>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: impl Into<String>, intent: Intent) -> Self {
        self.answers.insert(text.into(), intent);
        self
    }
}

#[async_trait]
impl IntentSource for StaticSource {
    async fn infer(&self, text: &str) -> EngineResult<Intent> {
        let intent = self
            .answers
            .get(text.trim())
            .cloned()
            .ok_or_else(|| EngineError::malformed(format!("no intent for '{}'", text.trim())))?;
        intent.validate()?;
        Ok(intent)
    }
}
