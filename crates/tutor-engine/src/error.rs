//! Error types for the tutoring session engine.
//!
//! This module defines the error taxonomy shared by every engine operation:
//! caller identity, missing sessions and sources, state-machine violations,
//! quota breaches, schema validation, and text-generation failures, plus the
//! infrastructure errors raised while loading configuration and content.

use std::path::PathBuf;

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while running tutoring sessions.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// The request carried no valid caller identity.
    #[error("Authentication required")]
    Unauthorized,

    /// The caller exceeded the quota for an operation.
    #[error("Rate limit exceeded: retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the current window closes.
        retry_after_secs: u64,
    },

    /// Malformed input, or generation output that failed a schema check.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// No session exists with the given id.
    #[error("Session not found: '{session_id}'")]
    SessionNotFound {
        /// The requested session id.
        session_id: String,
    },

    /// No source text or dialog exists with the given id.
    #[error("Source not found: '{source_id}'")]
    SourceNotFound {
        /// The requested source id.
        source_id: String,
    },

    // ========================================================================
    // Session Shape Errors
    // ========================================================================
    /// The operation is not valid for the session's current state or mode.
    #[error("Operation not allowed for this session: {message}")]
    InvalidSessionType {
        /// Description of the rejected operation.
        message: String,
    },

    /// The source content cannot support the requested session shape.
    #[error("Source cannot support this session: {message}")]
    InvalidStructure {
        /// Description of the structural problem.
        message: String,
    },

    /// Another writer updated the session first; the write was discarded.
    #[error("Session '{session_id}' was modified concurrently, please retry")]
    SessionConflict {
        /// The contended session id.
        session_id: String,
    },

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// The text-generation collaborator failed or timed out.
    #[error("Text generation failed: {message}")]
    GenerationFailed {
        /// Sanitized description of the failure.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    /// The source catalog file could not be loaded.
    #[error("Failed to load source catalog '{path}': {message}")]
    CatalogLoadError {
        /// Path to the catalog file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl std::fmt::Display) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Creates a new `SourceNotFound` error.
    #[must_use]
    pub fn source_not_found(source_id: impl Into<String>) -> Self {
        Self::SourceNotFound {
            source_id: source_id.into(),
        }
    }

    /// Creates a new `InvalidSessionType` error.
    #[must_use]
    pub fn invalid_session_type(message: impl Into<String>) -> Self {
        Self::InvalidSessionType {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStructure` error.
    #[must_use]
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Creates a new `SessionConflict` error.
    #[must_use]
    pub fn session_conflict(session_id: impl std::fmt::Display) -> Self {
        Self::SessionConflict {
            session_id: session_id.to_string(),
        }
    }

    /// Creates a new `GenerationFailed` error.
    #[must_use]
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `CatalogLoadError`.
    #[must_use]
    pub fn catalog_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CatalogLoadError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by the request rather than the server.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized
                | Self::RateLimitExceeded { .. }
                | Self::Validation { .. }
                | Self::SessionNotFound { .. }
                | Self::SourceNotFound { .. }
                | Self::InvalidSessionType { .. }
                | Self::InvalidStructure { .. }
        )
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::SessionConflict { .. }
                | Self::GenerationFailed { .. }
        )
    }

    /// Returns a stable snake_case code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Validation { .. } => "validation_error",
            Self::SessionNotFound { .. } | Self::SourceNotFound { .. } => "not_found",
            Self::InvalidSessionType { .. } => "invalid_session_type",
            Self::InvalidStructure { .. } => "invalid_structure",
            Self::SessionConflict { .. } => "session_conflict",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. }
            | Self::CatalogLoadError { .. }
            | Self::Io(_)
            | Self::Json(_) => "internal_error",
        }
    }
}

impl From<tutor_review::ReviewError> for TutorError {
    fn from(err: tutor_review::ReviewError) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = TutorError::session_not_found("abc-123");
        assert!(err.to_string().contains("Session not found"));
        assert!(err.to_string().contains("abc-123"));

        let err = TutorError::RateLimitExceeded {
            retry_after_secs: 42,
        };
        assert!(err.to_string().contains("42s"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(TutorError::Unauthorized.code(), "unauthorized");
        assert_eq!(TutorError::source_not_found("d1").code(), "not_found");
        assert_eq!(
            TutorError::invalid_structure("three roles").code(),
            "invalid_structure"
        );
        assert_eq!(
            TutorError::config_parse("tutor.json", "eof").code(),
            "internal_error"
        );
    }

    #[test]
    fn test_is_client_error() {
        assert!(TutorError::Unauthorized.is_client_error());
        assert!(TutorError::validation("empty").is_client_error());
        assert!(!TutorError::generation_failed("timeout").is_client_error());
        assert!(!TutorError::session_conflict("s").is_client_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(TutorError::generation_failed("timeout").is_transient());
        assert!(TutorError::session_conflict("s").is_transient());
        assert!(!TutorError::invalid_session_type("completed").is_transient());
    }

    #[test]
    fn test_from_review_error() {
        let err: TutorError = tutor_review::ReviewError::UnknownCategory("tone".to_string()).into();
        assert!(matches!(err, TutorError::Validation { .. }));
        assert!(err.to_string().contains("tone"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TutorError = io_err.into();
        assert!(matches!(err, TutorError::Io(_)));
    }
}
