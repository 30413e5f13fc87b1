//! Error kinds shared by the fetch / store / retrieve / summarize pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A search, embedding or generation endpoint could not be reached.
    #[error("{service} unavailable: {message}")]
    ExternalServiceUnavailable { service: String, message: String },

    /// A fetched record lacks required fields. Recovered locally by skipping.
    #[error("malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// Nothing matched a query or threshold. Not fatal; shown to the user as
    /// "no results" rather than as a failure.
    #[error("no results: {0}")]
    EmptyResult(String),

    /// The index write failed; nothing from the batch was committed.
    #[error("index persistence failed: {0}")]
    PersistenceFailure(String),

    /// Single-pass summarization input is larger than the model budget.
    #[error("summarization input of {size} chars exceeds budget of {budget} chars")]
    BudgetExceeded { size: usize, budget: usize },

    /// A streamed generation ended without its completion marker, or with
    /// malformed or error chunks.
    #[error("generation stream terminated: {0}")]
    StreamTerminated(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn unavailable(service: &str, message: impl ToString) -> Self {
        PipelineError::ExternalServiceUnavailable {
            service: service.to_string(),
            message: message.to_string(),
        }
    }

    pub fn malformed(id: &str, reason: impl ToString) -> Self {
        PipelineError::MalformedRecord {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::ExternalServiceUnavailable { .. })
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::PersistenceFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
