//! End-to-end retrieval orchestration: expand, embed, fan out per-variant
//! hybrid searches, merge, rerank.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{ExpansionConfig, RetrievalConfig};
use crate::embedder::Embedder;
use crate::error::KbError;
use crate::index::SearchFilter;
use crate::retrieve::hybrid::{HybridResult, HybridRetriever};
use crate::retrieve::merge::round_robin_merge;
use crate::retrieve::{Citation, FeedbackReranker, QueryExpander};

/// Final output of one retrieval call.
#[derive(Debug)]
pub struct RetrievalResponse {
    pub citations: Vec<Citation>,
    /// True when the response was assembled from partial results: an
    /// engine was down, a variant failed, or the deadline cut the fan-out
    /// short.
    pub degraded: bool,
}

pub struct RetrievalPipeline {
    expander: Arc<QueryExpander>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<HybridRetriever>,
    reranker: Arc<FeedbackReranker>,
    expansion: ExpansionConfig,
    retrieval: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(
        expander: Arc<QueryExpander>,
        embedder: Arc<dyn Embedder>,
        retriever: Arc<HybridRetriever>,
        reranker: Arc<FeedbackReranker>,
        expansion: ExpansionConfig,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            expander,
            embedder,
            retriever,
            reranker,
            expansion,
            retrieval,
        }
    }

    /// Run the full query pipeline for `query`.
    ///
    /// Variants are searched concurrently, at most `max_concurrency` at a
    /// time; whatever has completed when `variant_timeout_ms` expires is
    /// merged. A single failing variant is dropped from the merge; only
    /// all variants failing surfaces as an error.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<RetrievalResponse, KbError> {
        let variants = self.expand_variants(query).await;
        let embeddings = self.embed_variants(&variants).await;

        let mut degraded = embeddings.is_empty();
        let variant_count = variants.len();

        let semaphore = Arc::new(Semaphore::new(self.retrieval.max_concurrency.max(1)));
        let filter = filter.map(Arc::new);
        let mut set: JoinSet<(usize, Result<HybridResult, KbError>)> = JoinSet::new();

        for (idx, variant) in variants.into_iter().enumerate() {
            let embedding = embeddings.get(idx).cloned().unwrap_or_default();
            let retriever = Arc::clone(&self.retriever);
            let semaphore = Arc::clone(&semaphore);
            let filter = filter.clone();

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        return (
                            idx,
                            Err(KbError::RetrievalUnavailable(format!(
                                "variant scheduling failed: {e}"
                            ))),
                        );
                    }
                };
                let result = tokio::task::spawn_blocking(move || {
                    retriever.retrieve(&variant, &embedding, top_k, filter.as_deref())
                })
                .await;
                match result {
                    Ok(r) => (idx, r),
                    Err(e) => (
                        idx,
                        Err(KbError::RetrievalUnavailable(format!(
                            "variant search panicked: {e}"
                        ))),
                    ),
                }
            });
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.retrieval.variant_timeout_ms);
        let mut per_variant: Vec<Option<HybridResult>> =
            (0..variant_count).map(|_| None).collect();
        let mut failed = 0usize;

        while !set.is_empty() {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((idx, Ok(result))))) => {
                    degraded |= result.degraded;
                    per_variant[idx] = Some(result);
                }
                Ok(Some(Ok((_, Err(e))))) => {
                    warn!("Query variant failed: {e}");
                    failed += 1;
                }
                Ok(Some(Err(e))) => {
                    warn!("Query variant task aborted: {e}");
                    failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Variant deadline ({} ms) expired, merging partial results",
                        self.retrieval.variant_timeout_ms
                    );
                    set.abort_all();
                    degraded = true;
                    break;
                }
            }
        }

        let completed: Vec<HybridResult> = per_variant.into_iter().flatten().collect();
        if completed.is_empty() && failed == variant_count {
            return Err(KbError::RetrievalUnavailable(
                "every query variant failed".to_string(),
            ));
        }
        degraded |= failed > 0 || completed.is_empty();

        let lists: Vec<_> = completed.into_iter().map(|r| r.hits).collect();
        let merged = round_robin_merge(lists, top_k);
        debug!("Merged {} hits across variants", merged.len());

        let citations: Vec<Citation> = merged.into_iter().map(Citation::from_hit).collect();
        let reranker = Arc::clone(&self.reranker);
        let citations = tokio::task::spawn_blocking(move || reranker.rerank(citations))
            .await
            .map_err(|e| KbError::RetrievalUnavailable(format!("rerank task failed: {e}")))?;

        Ok(RetrievalResponse {
            citations,
            degraded,
        })
    }

    /// Expansion runs on a blocking thread; the generation client is a
    /// blocking HTTP client.
    async fn expand_variants(&self, query: &str) -> Vec<String> {
        let n = if self.expansion.enabled {
            self.expansion.num_variants
        } else {
            0
        };
        let expander = Arc::clone(&self.expander);
        let query = query.to_string();
        let fallback = query.clone();

        match tokio::task::spawn_blocking(move || expander.expand(&query, n)).await {
            Ok(variants) => variants,
            Err(e) => {
                warn!("Query expansion task failed, using original query: {e}");
                vec![fallback]
            }
        }
    }

    /// One batched embedding call for all variants. On failure the dense
    /// engine is skipped for every variant (empty embeddings), leaving the
    /// sparse engine to carry the query.
    async fn embed_variants(&self, variants: &[String]) -> Vec<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let texts: Vec<String> = variants.to_vec();

        let result = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed_batch(&refs)
        })
        .await;

        match result {
            Ok(Ok(embeddings)) => embeddings,
            Ok(Err(e)) => {
                warn!("Embedding failed, falling back to keyword search only: {e}");
                Vec::new()
            }
            Err(e) => {
                warn!("Embedding task failed, falling back to keyword search only: {e}");
                Vec::new()
            }
        }
    }
}
