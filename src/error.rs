//! Error types for the plan orchestrator

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Caller-Facing Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Response schema validation failed: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Classification error: {0}")]
    ClassificationError(String),

    #[error("Grounding error: {0}")]
    GroundingError(String),

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("LLM provider error ({kind}): {message}")]
    LlmError {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Job queue error: {0}")]
    JobQueueError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn llm(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::LlmError {
            kind,
            message: message.into(),
        }
    }

    /// True for the 4xx-class errors a caller can act on.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Forbidden(_) | Self::NotFound(_) | Self::Conflict(_)
        )
    }
}

impl From<sqlx::Error> for OrchestrationError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseError(e.to_string())
    }
}

/// Classified failure of the external language-model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    NotConfigured,
    RateLimited,
    QuotaExceeded,
    InvalidCredential,
    Timeout,
    MalformedResponse,
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::NotConfigured => "not_configured",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::InvalidCredential => "invalid_credential",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::MalformedResponse => "malformed_response",
            ProviderErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Stage Errors =================
//

/// Pipeline stages that are allowed to fail without failing the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    Grounding,
    Planning,
    Execution,
    Recommendation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Classification => "classification",
            Stage::Grounding => "grounding",
            Stage::Planning => "planning",
            Stage::Execution => "execution",
            Stage::Recommendation => "recommendation",
        };
        write!(f, "{}", s)
    }
}

/// A contained stage failure. Recorded in response metadata, never
/// surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, err: impl fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Adapter for `map_err` at a stage boundary
pub fn at_stage(stage: Stage) -> impl Fn(OrchestrationError) -> StageError {
    move |e| StageError::new(stage, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(OrchestrationError::Validation("x".into()).is_client_error());
        assert!(OrchestrationError::NotFound("x".into()).is_client_error());
        assert!(!OrchestrationError::SchemaValidation(vec![]).is_client_error());
        assert!(!OrchestrationError::llm(ProviderErrorKind::RateLimited, "429").is_client_error());
    }

    #[test]
    fn test_stage_error_display() {
        let err = at_stage(Stage::Grounding)(OrchestrationError::DatabaseError("down".into()));
        assert_eq!(err.stage, Stage::Grounding);
        assert_eq!(err.to_string(), "grounding stage failed: Database error: down");
    }

    #[test]
    fn test_schema_validation_lists_issues() {
        let err = OrchestrationError::SchemaValidation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Response schema validation failed: a; b");
    }
}
