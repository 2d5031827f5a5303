//! Ingestion orchestration: scan, diff, chunk, embed, dual-index write.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::KbError;
use crate::index::{DenseIndex, IndexedChunk, SparseIndex};
use crate::ingest::chunker;
use crate::ingest::version_store::{VersionStore, content_hash};

/// Counters for one incremental ingestion run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub new: usize,
    pub updated: usize,
    pub removed: usize,
    pub total_chunks: usize,
    pub failed: usize,
}

/// Counters for a full reindex.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReindexStats {
    pub total_docs: usize,
    pub total_chunks: usize,
}

struct ScannedDoc {
    path: PathBuf,
    hash: String,
    text: String,
}

/// Keeps the dense index, sparse index, and version store consistent with
/// the document folder.
///
/// The version store has a single writer: this indexer owns it exclusively.
pub struct KbIndexer {
    config: Config,
    embedder: Arc<dyn Embedder>,
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    versions: VersionStore,
}

impl KbIndexer {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        dense: Arc<dyn DenseIndex>,
        sparse: Arc<dyn SparseIndex>,
        versions: VersionStore,
    ) -> Self {
        Self {
            config,
            embedder,
            dense,
            sparse,
            versions,
        }
    }

    /// Diff the document folder against the version store and apply only
    /// the changes: new and updated documents are (re)indexed, removed
    /// documents are purged from both indexes.
    ///
    /// A failure on a single document is logged and skipped; its version
    /// record is left untouched so it is retried on the next run.
    pub fn ingest_incremental(&mut self) -> Result<IngestStats, KbError> {
        let docs = self.scan()?;
        let hashes: BTreeMap<String, String> = docs
            .iter()
            .map(|(id, d)| (id.clone(), d.hash.clone()))
            .collect();
        let diff = self.versions.diff(&hashes);

        let mut stats = IngestStats::default();

        for doc_id in &diff.removed {
            match self.remove_document(doc_id) {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    warn!("Failed to remove {doc_id}: {e}");
                    stats.failed += 1;
                }
            }
        }

        for doc_id in &diff.updated {
            let doc = &docs[doc_id];
            match self.reindex_document(doc_id, doc, true) {
                Ok(chunks) => {
                    stats.updated += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    warn!("Failed to update {doc_id}: {e}");
                    stats.failed += 1;
                }
            }
        }

        for doc_id in &diff.new {
            let doc = &docs[doc_id];
            match self.reindex_document(doc_id, doc, false) {
                Ok(chunks) => {
                    stats.new += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    warn!("Failed to index {doc_id}: {e}");
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Ingestion complete: {} new, {} updated, {} removed, {} chunks, {} failed",
            stats.new, stats.updated, stats.removed, stats.total_chunks, stats.failed
        );
        Ok(stats)
    }

    /// Clear the version store and both indexes, then index every document
    /// from scratch.
    pub fn ingest_full_reindex(&mut self) -> Result<ReindexStats, KbError> {
        let docs = self.scan()?;

        self.versions.clear()?;
        self.dense.clear()?;
        self.sparse.clear()?;

        let mut stats = ReindexStats::default();
        for (doc_id, doc) in &docs {
            match self.reindex_document(doc_id, doc, false) {
                Ok(chunks) => {
                    stats.total_docs += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    warn!("Failed to index {doc_id}: {e}");
                }
            }
        }

        info!(
            "Full reindex complete: {} documents, {} chunks",
            stats.total_docs, stats.total_chunks
        );
        Ok(stats)
    }

    /// Enumerate source documents matching the configured patterns and hash
    /// their content.
    fn scan(&self) -> Result<BTreeMap<String, ScannedDoc>, KbError> {
        let files = self
            .config
            .get_document_files()
            .map_err(|e| KbError::Configuration(e.to_string()))?;
        let bases = self.config.get_base_directories();

        let mut docs = BTreeMap::new();
        for path in files {
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to read {}: {e}", path.display());
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let hash = content_hash(&bytes);
            let doc_id = derive_doc_id(&path, &bases);
            docs.insert(doc_id, ScannedDoc { path, hash, text });
        }
        Ok(docs)
    }

    /// Chunk, embed, and insert one document, then commit its version
    /// record. For updates the document's existing chunks are fully
    /// deleted from both indexes before the new ones are inserted.
    fn reindex_document(
        &mut self,
        doc_id: &str,
        doc: &ScannedDoc,
        is_update: bool,
    ) -> Result<usize, KbError> {
        if is_update {
            self.dense.delete_document(doc_id)?;
            self.sparse.delete_document(doc_id)?;
        }

        let title = chunker::extract_title(&doc.text).unwrap_or_else(|| {
            doc.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| doc_id.to_string())
        });

        let chunks = chunker::chunk(&doc.text, self.config.chunk_size, self.config.chunk_overlap);
        let indexed: Vec<IndexedChunk> = chunks
            .iter()
            .map(|c| IndexedChunk {
                chunk_id: format!("{doc_id}#{}", c.ordinal),
                doc_id: doc_id.to_string(),
                title: title.clone(),
                section_path: c.section_path.clone(),
                text: c.text.clone(),
                start_offset: c.start_offset,
                end_offset: c.end_offset,
            })
            .collect();

        if !indexed.is_empty() {
            let texts: Vec<&str> = indexed.iter().map(|c| c.text.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts)?;

            // Index writes first; the version record is committed last so a
            // crash can never leave a record pointing at missing chunks
            self.dense.upsert(&indexed, &vectors)?;
            self.sparse.upsert(&indexed)?;
        }

        self.versions.commit(doc_id, &doc.hash)?;
        Ok(indexed.len())
    }

    /// Purge a document from both indexes and drop its version record.
    fn remove_document(&mut self, doc_id: &str) -> Result<(), KbError> {
        let dense_removed = self.dense.delete_document(doc_id)?;
        let sparse_removed = self.sparse.delete_document(doc_id)?;
        self.versions.remove(doc_id)?;
        info!(
            "Removed {doc_id}: {} dense chunks, {} sparse chunks",
            dense_removed, sparse_removed
        );
        Ok(())
    }
}

/// Derive a document id from a file path: the path relative to the longest
/// matching base directory, forward-slash normalized.
fn derive_doc_id(path: &Path, bases: &[PathBuf]) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let rel = bases
        .iter()
        .filter_map(|base| abs.strip_prefix(base).ok())
        .max_by_key(|rel| abs.components().count() - rel.components().count())
        .map(|rel| rel.to_path_buf())
        .unwrap_or(abs);

    rel.to_string_lossy().replace('\\', "/")
}
