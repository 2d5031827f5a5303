//! Index abstractions: one dense (vector) and one sparse (keyword) store,
//! injected at construction so backends can be swapped without touching the
//! ingestion or retrieval code.
use thiserror::Error;

pub mod dense;
pub mod sparse;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("chunks and vectors must pair up: {chunks} chunks, {vectors} vectors")]
    UnpairedInput { chunks: usize, vectors: usize },
}

/// Which engine produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Dense,
    Sparse,
    Fused,
}

/// A single result from either engine, or from fusion.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Globally unique chunk id (`{doc_id}#{ordinal}`).
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub section_path: String,
    pub text: String,
    pub score: f32,
    pub origin: Origin,
}

/// A chunk as stored in the indexes. Upserts are keyed by `chunk_id`, so
/// re-ingesting the same document is safe to retry.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub section_path: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Optional metadata constraints applied inside index queries.
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    /// Limit results to documents under a directory prefix.
    pub directory: Option<String>,
    /// Filter by filename glob pattern (e.g. `api-*.md`).
    pub file_pattern: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.directory.is_none() && self.file_pattern.is_none()
    }
}

/// Vector-similarity store for semantic nearest-neighbor search.
pub trait DenseIndex: Send + Sync {
    /// Insert or replace chunks with their embedding vectors.
    fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Delete every chunk belonging to `doc_id`. Returns the number removed.
    fn delete_document(&self, doc_id: &str) -> Result<usize, IndexError>;

    /// K-nearest-neighbor query by embedding.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Drop all indexed content.
    fn clear(&self) -> Result<(), IndexError>;

    /// Number of chunks currently indexed for `doc_id`.
    fn chunk_count(&self, doc_id: &str) -> Result<usize, IndexError>;
}

/// Keyword-frequency store (BM25-style lexical matching).
pub trait SparseIndex: Send + Sync {
    /// Insert or replace chunks (text only).
    fn upsert(&self, chunks: &[IndexedChunk]) -> Result<(), IndexError>;

    /// Delete every chunk belonging to `doc_id`. Returns the number removed.
    fn delete_document(&self, doc_id: &str) -> Result<usize, IndexError>;

    /// Lexical query by raw text.
    fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Drop all indexed content.
    fn clear(&self) -> Result<(), IndexError>;

    /// Number of chunks currently indexed for `doc_id`.
    fn chunk_count(&self, doc_id: &str) -> Result<usize, IndexError>;
}

/// Convert a filename glob into a SQL LIKE pattern.
pub(crate) fn glob_to_like(pattern: &str) -> String {
    let mut result = pattern.replace("%", "\\%");
    result = result.replace("_", "\\_");
    result = result.replace("*", "%");
    result = result.replace("?", "_");
    result
}

/// Build WHERE clauses for a metadata filter against the shared chunk
/// column layout (`doc_id`, matched with LIKE).
pub(crate) fn filter_clauses(
    filter: &SearchFilter,
    clauses: &mut Vec<String>,
    params: &mut Vec<rusqlite::types::Value>,
) {
    use rusqlite::types::Value;

    if let Some(ref dir) = filter.directory {
        let d = dir
            .trim_end_matches('/')
            .trim_end_matches(std::path::MAIN_SEPARATOR);
        clauses.push("doc_id LIKE ?".to_string());
        params.push(Value::Text(format!("{}/%", d)));
    }
    if let Some(ref pat) = filter.file_pattern {
        let like_pat = glob_to_like(pat);
        clauses.push("(doc_id LIKE ? ESCAPE '\\' OR doc_id LIKE ? ESCAPE '\\')".to_string());
        params.push(Value::Text(format!("%/{}", like_pat)));
        params.push(Value::Text(like_pat));
    }
}
