//! # kbfuse — Hybrid-Retrieval Knowledge Base
//!
//! Indexes a folder of documents into paired dense (vector) and sparse
//! (keyword) indexes, keeps them consistent through content-hash diffing,
//! and answers queries by fusing both signals across paraphrased query
//! variants, reranked by accumulated reader feedback.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, validation, and document pattern expansion
//! - **[`embedder`]** — Text embedding capability (HTTP service or deterministic local)
//! - **[`generator`]** — Text generation capability, used for query expansion
//! - **[`index`]** — Dense (SQLite + sqlite-vec) and sparse (FTS5/BM25) index adapters
//! - **[`ingest`]** — Chunking, content versioning, and the incremental indexer
//! - **[`retrieve`]** — Query expansion, hybrid fusion, round-robin merge, feedback rerank
//! - **[`kb`]** — The context object wiring everything together
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod kb;
pub mod retrieve;

pub use error::KbError;
pub use kb::KnowledgeBase;
