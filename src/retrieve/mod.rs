//! Query-time retrieval: expansion, per-variant hybrid search, round-robin
//! merge, and feedback-aware reranking.
pub mod expand;
pub mod feedback;
pub mod hybrid;
pub mod merge;
pub mod pipeline;

pub use expand::QueryExpander;
pub use feedback::{FeedbackReranker, FeedbackStore, SqliteFeedbackStore};
pub use hybrid::HybridRetriever;
pub use pipeline::{RetrievalPipeline, RetrievalResponse};

use crate::index::SearchHit;

/// A ranked result as returned to callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Citation {
    pub doc_id: String,
    pub chunk_id: String,
    pub title: String,
    pub section_path: String,
    pub score: f32,
    /// Like percentage from accumulated feedback, when any exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_percentage: Option<f64>,
    pub snippet: String,
}

impl Citation {
    pub fn from_hit(hit: SearchHit) -> Self {
        let snippet = snippet_of(&hit.text, 200);
        Self {
            doc_id: hit.doc_id,
            chunk_id: hit.chunk_id,
            title: hit.title,
            section_path: hit.section_path,
            score: hit.score,
            like_percentage: None,
            snippet,
        }
    }
}

/// First `max_chars` characters of the chunk, cut at a char boundary with
/// an ellipsis when truncated.
fn snippet_of(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
