//! Ingestion side of the knowledge base: chunking, content versioning, and
//! the incremental indexer that keeps both indexes in step with the
//! document folder.
pub mod chunker;
pub mod indexer;
pub mod version_store;

pub use indexer::{IngestStats, KbIndexer, ReindexStats};
pub use version_store::VersionStore;
