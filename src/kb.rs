//! The knowledge-base context object: owns the configuration, indexes,
//! and capabilities, constructed once at startup and passed by reference.
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::KbError;
use crate::generator::Generator;
use crate::index::SearchFilter;
use crate::index::dense::SqliteDenseIndex;
use crate::index::sparse::SqliteSparseIndex;
use crate::ingest::{IngestStats, KbIndexer, ReindexStats, VersionStore};
use crate::retrieve::feedback::FeedbackStore;
use crate::retrieve::{
    FeedbackReranker, HybridRetriever, QueryExpander, RetrievalPipeline, RetrievalResponse,
    SqliteFeedbackStore,
};

pub struct KnowledgeBase {
    config: Config,
    indexer: Mutex<KbIndexer>,
    pipeline: RetrievalPipeline,
    feedback: Arc<SqliteFeedbackStore>,
}

impl KnowledgeBase {
    /// Open (or create) every store and wire the components together.
    ///
    /// The embedder is required; the generator is optional and only used
    /// for query expansion.
    pub fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Result<Self, KbError> {
        config
            .validate()
            .map_err(|e| KbError::Configuration(e.to_string()))?;

        let dense = Arc::new(SqliteDenseIndex::open(
            &config.dense_index_path,
            config.model.dimensions,
        )?);
        let sparse = Arc::new(SqliteSparseIndex::open(&config.sparse_index_path)?);
        let feedback = Arc::new(SqliteFeedbackStore::open(&config.feedback_db_path)?);
        let versions = VersionStore::load(&config.version_store_path)?;

        info!(
            "Knowledge base opened: {} documents tracked",
            versions.len()
        );

        let indexer = KbIndexer::new(
            config.clone(),
            Arc::clone(&embedder),
            Arc::clone(&dense) as Arc<dyn crate::index::DenseIndex>,
            Arc::clone(&sparse) as Arc<dyn crate::index::SparseIndex>,
            versions,
        );

        let retriever = HybridRetriever::new(dense, sparse, config.retrieval.clone());
        let reranker = FeedbackReranker::new(
            Arc::clone(&feedback) as Arc<dyn FeedbackStore>,
            config.feedback.clone(),
        );
        let pipeline = RetrievalPipeline::new(
            Arc::new(QueryExpander::new(generator)),
            embedder,
            Arc::new(retriever),
            Arc::new(reranker),
            config.expansion.clone(),
            config.retrieval.clone(),
        );

        Ok(Self {
            config,
            indexer: Mutex::new(indexer),
            pipeline,
            feedback,
        })
    }

    /// Diff the document folder against the version store and index only
    /// what changed.
    pub fn ingest_incremental(&self) -> Result<IngestStats, KbError> {
        self.indexer().ingest_incremental()
    }

    /// Rebuild both indexes from scratch.
    pub fn ingest_full_reindex(&self) -> Result<ReindexStats, KbError> {
        self.indexer().ingest_full_reindex()
    }

    /// Run the query pipeline; `top_k` falls back to the configured value.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: Option<SearchFilter>,
    ) -> Result<RetrievalResponse, KbError> {
        let k = top_k.unwrap_or(self.config.search_top_k);
        self.pipeline.retrieve(query, k, filter).await
    }

    /// Record one like or dislike for a retrieved chunk.
    pub fn record_feedback(&self, chunk_id: &str, liked: bool) -> Result<(), KbError> {
        self.feedback.record(chunk_id, liked)?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn indexer(&self) -> MutexGuard<'_, KbIndexer> {
        self.indexer.lock().unwrap_or_else(|e| e.into_inner())
    }
}
