//! Per-variant hybrid search: dense and sparse engines queried side by
//! side, scores normalized and fused with configurable weights.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::KbError;
use crate::index::{DenseIndex, Origin, SearchFilter, SearchHit, SparseIndex};

/// Outcome of one hybrid query.
#[derive(Debug)]
pub struct HybridResult {
    pub hits: Vec<SearchHit>,
    /// True when one engine was unavailable and the result came from the
    /// other alone.
    pub degraded: bool,
}

pub struct HybridRetriever {
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        dense: Arc<dyn DenseIndex>,
        sparse: Arc<dyn SparseIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            dense,
            sparse,
            config,
        }
    }

    /// Query both engines and fuse their rankings.
    ///
    /// Each engine is asked for `top_k * candidate_multiplier` hits. Raw
    /// scores are min-max normalized per engine, then combined as
    /// `vector_weight * dense + keyword_weight * sparse`; an id seen by only
    /// one engine keeps that engine's weighted share. Candidates below the
    /// score threshold are dropped; an empty result after the filter is a
    /// valid zero-match outcome. Only when both engines fail does this
    /// return an error.
    pub fn retrieve(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<HybridResult, KbError> {
        let fetch_k = top_k.saturating_mul(self.config.candidate_multiplier).max(top_k);

        // An empty embedding means the embedder itself failed upstream;
        // skip the dense engine instead of sending it a malformed query
        let dense_hits = if query_embedding.is_empty() {
            None
        } else {
            match self.dense.query(query_embedding, fetch_k, filter) {
                Ok(hits) => Some(hits),
                Err(e) => {
                    warn!("Dense engine unavailable: {e}");
                    None
                }
            }
        };
        let sparse_hits = match self.sparse.query(query_text, fetch_k, filter) {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!("Sparse engine unavailable: {e}");
                None
            }
        };

        let degraded = dense_hits.is_none() || sparse_hits.is_none();
        let (dense_hits, sparse_hits) = match (dense_hits, sparse_hits) {
            (None, None) => {
                return Err(KbError::RetrievalUnavailable(
                    "both dense and sparse engines failed".to_string(),
                ));
            }
            (d, s) => (d.unwrap_or_default(), s.unwrap_or_default()),
        };

        let dense_norm = normalize(&dense_hits);
        let sparse_norm = normalize(&sparse_hits);

        // Candidates in dense-first encounter order; the later stable sort
        // keeps that order for equal fused scores
        let mut order: Vec<String> = Vec::new();
        let mut fused: HashMap<String, SearchHit> = HashMap::new();

        for (hit, norm) in dense_hits.into_iter().zip(dense_norm) {
            let mut hit = hit;
            hit.score = self.config.vector_weight * norm;
            hit.origin = Origin::Fused;
            order.push(hit.chunk_id.clone());
            fused.insert(hit.chunk_id.clone(), hit);
        }
        for (hit, norm) in sparse_hits.into_iter().zip(sparse_norm) {
            let weighted = self.config.keyword_weight * norm;
            match fused.get_mut(&hit.chunk_id) {
                Some(existing) => existing.score += weighted,
                None => {
                    let mut hit = hit;
                    hit.score = weighted;
                    hit.origin = Origin::Fused;
                    order.push(hit.chunk_id.clone());
                    fused.insert(hit.chunk_id.clone(), hit);
                }
            }
        }

        let mut hits: Vec<SearchHit> = order
            .iter()
            .filter_map(|id| fused.remove(id))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.retain(|h| h.score >= self.config.score_threshold);
        hits.truncate(top_k);

        Ok(HybridResult { hits, degraded })
    }
}

/// Min-max normalize raw engine scores into [0, 1].
///
/// A single hit, or a list where every score is equal, normalizes to 1.0
/// so one strong engine cannot be zeroed out by its own scale.
fn normalize(hits: &[SearchHit]) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
    let max = hits.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; hits.len()];
    }
    hits.iter().map(|h| (h.score - min) / range).collect()
}
