//! Error types for the translation pipeline

use thiserror::Error;

use crate::db::DbError;
use crate::llm::LlmError;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures that abort a whole `query()` call.
///
/// Everything else (rejected statements, database errors, failed
/// corrections) is recovered inside the correction loop and reported as
/// data on the outcome.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema fetch error: {0}")]
    SchemaFetch(#[source] DbError),

    #[error("Translation error: {0}")]
    Translation(#[from] LlmError),
}

impl PipelineError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::SchemaFetch(e) => {
                format!("Could not read the database schema: {}. Ensure the database is reachable.", e)
            }
            PipelineError::Translation(e) => {
                format!("Could not translate the question into SQL: {}", e)
            }
        }
    }
}

/// Why a single attempt did not produce rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("Validation rejected: {}", .0.join("; "))]
    ValidationRejected(Vec<String>),

    #[error("{0}")]
    Execution(String),

    #[error("Correction failed: {0}")]
    Translation(String),
}
