use thiserror::Error;

use partyhub_agent::{ProviderError, TemplateError};
use partyhub_content::{AgeGroup, ContentError};

use crate::retry;

/// Failure of one generation attempt (or of a whole run, for the variants
/// noted below).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("prompt template error: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    /// Category lookup failed. Fatal for a run.
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("category {category_id} ({category_age}) is not suitable for {target}")]
    IncompatibleAgeGroup {
        category_id: i64,
        category_age: AgeGroup,
        target: AgeGroup,
    },

    #[error("content provider is not configured")]
    ProviderUnconfigured,

    /// Fatal for a run.
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether another attempt at the same combination may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Provider(e) => retry::is_transient_provider_error(e),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    /// Deleting expired rows from one table failed; the run stops there.
    #[error("purge of {table} failed: {source}")]
    Purge {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Storage reclamation failed. Logged only, never returned from a run.
    #[error("storage reclamation failed: {0}")]
    Reclamation(#[source] rusqlite::Error),

    #[error("cleanup query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("retention window of {0} months is out of range")]
    InvalidRetention(u32),
}
