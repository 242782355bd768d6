//! Error types for polyq.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::backend::BackendKind;

/// The main error type for polyq operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The intent is structurally invalid; no backend was attempted.
    #[error("Malformed intent: {0}")]
    MalformedIntent(String),

    /// The backend's query language cannot express the intent.
    #[error("{backend} cannot express this intent: {reason}")]
    UnsupportedOperation { backend: BackendKind, reason: String },

    /// A predicate operator does not fit the field's type.
    #[error("Invalid predicate on '{field}': {reason}")]
    InvalidPredicateType { field: String, reason: String },

    /// The backend could not be reached.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// The backend accepted the query but failed running it.
    #[error("{backend} execution error: {reason}")]
    Execution { backend: BackendKind, reason: String },

    /// Execution exceeded the configured budget.
    #[error("timeout")]
    Timeout,

    /// Failed to parse the compact intent syntax.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification carried by error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MalformedIntent,
    UnsupportedOperation,
    InvalidPredicateType,
    BackendUnavailable,
    ExecutionError,
    Timeout,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedIntent => "malformed-intent",
            ErrorKind::UnsupportedOperation => "unsupported-operation",
            ErrorKind::InvalidPredicateType => "invalid-predicate-type",
            ErrorKind::BackendUnavailable => "backend-unavailable",
            ErrorKind::ExecutionError => "execution-error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
        };
        write!(f, "{}", name)
    }
}

impl EngineError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedIntent(message.into())
    }

    pub fn unsupported(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            backend,
            reason: reason.into(),
        }
    }

    pub fn invalid_predicate(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPredicateType {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn execution(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::Execution {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedIntent(_) | Self::Parse { .. } => ErrorKind::MalformedIntent,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::InvalidPredicateType { .. } => ErrorKind::InvalidPredicateType,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::Execution { .. } => ErrorKind::ExecutionError,
            Self::Timeout => ErrorKind::Timeout,
            Self::Config(_) | Self::Io(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for polyq operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
        assert_eq!(err.kind(), ErrorKind::MalformedIntent);
    }

    #[test]
    fn test_timeout_detail() {
        assert_eq!(EngineError::Timeout.to_string(), "timeout");
        assert_eq!(EngineError::Timeout.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_backend_named_in_message() {
        let err = EngineError::unsupported(BackendKind::WideColumn, "offset pagination");
        assert_eq!(
            err.to_string(),
            "wide-column cannot express this intent: offset pagination"
        );
        assert_eq!(err.kind().to_string(), "unsupported-operation");
    }
}
