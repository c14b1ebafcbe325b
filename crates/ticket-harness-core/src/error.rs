//! Pipeline-level failures.
//!
//! Per-fragment problems (a corrupt stored vector, a dimension mismatch)
//! never surface here: the dense scorer drops the fragment and carries on.
//! Only failures that make the whole query impossible are returned to the
//! caller, typed so the caller can choose a fallback.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The fragment source could not produce a snapshot.
    #[error("fragment source unavailable: {0}")]
    SourceUnavailable(#[source] BoxError),

    /// The query text could not be embedded.
    #[error("query embedding failed: {0}")]
    Embedding(#[source] BoxError),

    #[error("invalid search parameters: {0}")]
    InvalidParams(String),
}

impl RetrievalError {
    pub fn source_unavailable(err: anyhow::Error) -> Self {
        RetrievalError::SourceUnavailable(err.into())
    }

    pub fn embedding(err: anyhow::Error) -> Self {
        RetrievalError::Embedding(err.into())
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
