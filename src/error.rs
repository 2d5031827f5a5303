use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::index::IndexError;

/// Top-level error type for knowledge-base operations.
///
/// Per-document ingestion failures and per-variant retrieval failures are
/// isolated inside their components and reported through counters; only
/// unrecoverable conditions surface here.
#[derive(Error, Debug)]
pub enum KbError {
    /// A required index or capability is missing or invalid at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every retrieval backend failed for a query. Distinct from a valid
    /// empty result set (zero matches after threshold filtering).
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("version store error: {0}")]
    VersionStore(#[from] crate::ingest::version_store::VersionStoreError),

    #[error("feedback store error: {0}")]
    Feedback(#[from] crate::retrieve::feedback::FeedbackError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
