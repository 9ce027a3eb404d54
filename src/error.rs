//! Error types for the financial document orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Failure classes reported by the extraction services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    ServiceUnavailable,
    UnsupportedFormat,
    LowConfidence,
    Timeout,
}

impl UpstreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamKind::ServiceUnavailable => "service_unavailable",
            UpstreamKind::UnsupportedFormat => "unsupported_format",
            UpstreamKind::LowConfidence => "low_confidence",
            UpstreamKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-checkable error kind carried next to every human-readable reason.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    AccessError,
    NotFoundError,
    UpstreamError,
    EvaluationError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputError => "input_error",
            ErrorKind::AccessError => "access_error",
            ErrorKind::NotFoundError => "not_found_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::EvaluationError => "evaluation_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Caller-facing taxonomy
    // =============================

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("{0}")]
    Access(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream {kind} failure: {message}")]
    Upstream { kind: UpstreamKind, message: String },

    #[error("Formula evaluation failed: {0}")]
    Evaluation(String),

    // =============================
    // Infrastructure
    // =============================

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn access_denied() -> Self {
        OrchestrationError::Access("Access denied".to_string())
    }

    pub fn upstream(kind: UpstreamKind, message: impl Into<String>) -> Self {
        OrchestrationError::Upstream {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::Input(_) => ErrorKind::InputError,
            OrchestrationError::Access(_) => ErrorKind::AccessError,
            OrchestrationError::NotFound(_) => ErrorKind::NotFoundError,
            OrchestrationError::Upstream { .. } | OrchestrationError::Http(_) => {
                ErrorKind::UpstreamError
            }
            OrchestrationError::Evaluation(_) => ErrorKind::EvaluationError,
            OrchestrationError::Storage(_)
            | OrchestrationError::Database(_)
            | OrchestrationError::Serialization(_)
            | OrchestrationError::Io(_) => ErrorKind::InternalError,
        }
    }

    /// Only transient upstream failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::Upstream { kind, .. } => matches!(
                kind,
                UpstreamKind::ServiceUnavailable | UpstreamKind::Timeout
            ),
            OrchestrationError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Structured form embedded in persisted results and API bodies.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            error_kind: self.kind(),
            retryable: self.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub error_kind: ErrorKind,
    pub retryable: bool,
}
