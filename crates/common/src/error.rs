use thiserror::Error;

/// Failures of the retrieval core.
///
/// `RetrievalUnavailable` and `RerankModel` come from optional stages and are
/// recovered by the pipeline; the rest are surfaced to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("lexical index queried before it was built")]
    EmptyIndex,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("semantic retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("no relevant context found")]
    EmptyFusion,

    #[error("relevance model failed: {0}")]
    RerankModel(String),

    #[error("duplicate chunk id in corpus: {0}")]
    DuplicateChunkId(String),

    #[error("query cancelled")]
    Cancelled,
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

impl RetrievalError {
    /// Whether the pipeline can keep going with reduced quality.
    pub const fn is_degradable(&self) -> bool {
        matches!(self, Self::RetrievalUnavailable(_) | Self::RerankModel(_))
    }
}
