//! End-to-end tests: ingest a real document folder, then query it through
//! the full pipeline.
use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use kbfuse::KnowledgeBase;
use kbfuse::config::Config;
use kbfuse::embedder::mock::HashingEmbedder;
use kbfuse::index::SearchFilter;

const DIMS: usize = 64;

fn open_kb(dir: &TempDir) -> KnowledgeBase {
    let docs = dir.path().join("documents");
    fs::create_dir_all(&docs).unwrap();

    let mut config = Config::default();
    config.document_patterns = vec![docs.to_string_lossy().into_owned()];
    config.dense_index_path = dir.path().join("dense.db").to_string_lossy().into_owned();
    config.sparse_index_path = dir.path().join("sparse.db").to_string_lossy().into_owned();
    config.feedback_db_path = dir.path().join("feedback.db").to_string_lossy().into_owned();
    config.version_store_path = dir.path().join("versions.json").to_string_lossy().into_owned();
    config.model.dimensions = DIMS;
    config.retrieval.score_threshold = 0.0;

    KnowledgeBase::open(config, Arc::new(HashingEmbedder::new(DIMS)), None).unwrap()
}

fn write_doc(dir: &TempDir, name: &str, content: &str) {
    let path = dir.path().join("documents").join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_ingestion_lifecycle() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(&dir, "alpha.md", "# Alpha\n\nNotes about the alpha subsystem.");
    write_doc(&dir, "beta.md", "# Beta\n\nNotes about the beta subsystem.");
    write_doc(&dir, "gamma.md", "# Gamma\n\nNotes about the gamma subsystem.");

    // First run indexes everything
    let stats = kb.ingest_incremental().unwrap();
    assert_eq!(stats.new, 3);
    assert_eq!(stats.failed, 0);
    assert!(stats.total_chunks >= 3);

    // Unchanged rerun is a no-op
    let stats = kb.ingest_incremental().unwrap();
    assert_eq!((stats.new, stats.updated, stats.removed), (0, 0, 0));
    assert_eq!(stats.total_chunks, 0);

    // Edit one file
    write_doc(&dir, "beta.md", "# Beta\n\nCompletely rewritten beta notes.");
    let stats = kb.ingest_incremental().unwrap();
    assert_eq!((stats.new, stats.updated, stats.removed), (0, 1, 0));

    // Delete one file
    fs::remove_file(dir.path().join("documents/gamma.md")).unwrap();
    let stats = kb.ingest_incremental().unwrap();
    assert_eq!((stats.new, stats.updated, stats.removed), (0, 0, 1));
}

#[tokio::test]
async fn test_retrieval_finds_relevant_document() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(
        &dir,
        "async.md",
        "# Async Runtime\n\nSpawning tasks on the tokio runtime and awaiting futures.",
    );
    write_doc(
        &dir,
        "baking.md",
        "# Baking\n\nKneading sourdough and proofing the dough overnight.",
    );
    kb.ingest_incremental().unwrap();

    let response = kb
        .retrieve("spawning tokio tasks", None, None)
        .await
        .unwrap();
    assert!(!response.degraded);
    assert!(!response.citations.is_empty());
    assert_eq!(response.citations[0].doc_id, "async.md");
    assert!(response.citations[0].score.is_finite());
    assert!(!response.citations[0].snippet.is_empty());
}

#[tokio::test]
async fn test_removed_document_disappears_from_results() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(
        &dir,
        "doomed.md",
        "# Doomed\n\nZanzibar quokka festival logistics.",
    );
    kb.ingest_incremental().unwrap();

    let response = kb
        .retrieve("zanzibar quokka festival", None, None)
        .await
        .unwrap();
    assert!(!response.citations.is_empty());

    fs::remove_file(dir.path().join("documents/doomed.md")).unwrap();
    kb.ingest_incremental().unwrap();

    let response = kb
        .retrieve("zanzibar quokka festival", None, None)
        .await
        .unwrap();
    assert!(response.citations.is_empty());
}

#[tokio::test]
async fn test_directory_filter() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(
        &dir,
        "guides/deploy.md",
        "# Deploy\n\nRolling deployment with health checks.",
    );
    write_doc(
        &dir,
        "rfcs/deploy.md",
        "# Deploy RFC\n\nRolling deployment with health checks.",
    );
    kb.ingest_incremental().unwrap();

    let filter = SearchFilter {
        directory: Some("guides".to_string()),
        file_pattern: None,
    };
    let response = kb
        .retrieve("rolling deployment health checks", None, Some(filter))
        .await
        .unwrap();
    assert!(!response.citations.is_empty());
    assert!(
        response
            .citations
            .iter()
            .all(|c| c.doc_id.starts_with("guides/"))
    );
}

/// Golden relevance set: ten queries with a known best document each.
#[tokio::test]
async fn test_golden_set_recall() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(
        &dir,
        "networking.md",
        "# Networking\n\nTCP sockets, connection timeouts, retries with exponential \
         backoff, DNS resolution, and load balancer configuration for services.",
    );
    write_doc(
        &dir,
        "storage.md",
        "# Storage\n\nSQLite database files, write-ahead logging, vacuum maintenance, \
         schema migrations, and backup snapshots for persistent data.",
    );
    write_doc(
        &dir,
        "observability.md",
        "# Observability\n\nStructured logging, trace spans, latency histograms, \
         alert thresholds, and dashboard panels for monitoring production systems.",
    );
    kb.ingest_incremental().unwrap();

    let golden: &[(&str, &str)] = &[
        ("tcp connection timeouts and retries", "networking.md"),
        ("exponential backoff for network retries", "networking.md"),
        ("dns resolution for services", "networking.md"),
        ("load balancer configuration", "networking.md"),
        ("sqlite write-ahead logging", "storage.md"),
        ("database schema migrations", "storage.md"),
        ("backup snapshots for persistent data", "storage.md"),
        ("structured logging and trace spans", "observability.md"),
        ("latency histograms and dashboards", "observability.md"),
        ("alert thresholds for monitoring", "observability.md"),
    ];

    let mut hit_at_1 = 0usize;
    let mut hit_at_3 = 0usize;
    for (query, expected) in golden {
        let response = kb.retrieve(query, Some(3), None).await.unwrap();
        if response
            .citations
            .first()
            .is_some_and(|c| c.doc_id == *expected)
        {
            hit_at_1 += 1;
        }
        if response.citations.iter().take(3).any(|c| c.doc_id == *expected) {
            hit_at_3 += 1;
        }
    }

    let recall_at_1 = hit_at_1 as f64 / golden.len() as f64;
    let recall_at_3 = hit_at_3 as f64 / golden.len() as f64;
    assert!(recall_at_1 >= 0.5, "recall@1 too low: {recall_at_1}");
    assert!(recall_at_3 >= 0.7, "recall@3 too low: {recall_at_3}");
}

#[tokio::test]
async fn test_feedback_changes_ranking() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    // Identical content so base scores tie; feedback must break the tie
    write_doc(&dir, "a.md", "# A\n\nCaching strategies for hot keys.");
    write_doc(&dir, "b.md", "# B\n\nCaching strategies for hot keys.");
    kb.ingest_incremental().unwrap();

    for _ in 0..5 {
        kb.record_feedback("a.md#0", false).unwrap();
    }
    for _ in 0..5 {
        kb.record_feedback("b.md#0", true).unwrap();
    }

    let response = kb
        .retrieve("caching strategies hot keys", None, None)
        .await
        .unwrap();
    assert_eq!(response.citations[0].doc_id, "b.md");
    assert_eq!(response.citations[0].like_percentage, Some(100.0));
    let a = response
        .citations
        .iter()
        .find(|c| c.doc_id == "a.md")
        .unwrap();
    assert_eq!(a.like_percentage, Some(0.0));
    assert!(a.score < response.citations[0].score);
}

#[test]
fn test_full_reindex_after_incremental() {
    let dir = TempDir::new().unwrap();
    let kb = open_kb(&dir);
    write_doc(&dir, "one.md", "# One\n\nFirst document body.");
    write_doc(&dir, "two.md", "# Two\n\nSecond document body.");
    kb.ingest_incremental().unwrap();

    let stats = kb.ingest_full_reindex().unwrap();
    assert_eq!(stats.total_docs, 2);
    assert_eq!(stats.total_chunks, 2);

    // Incremental right after a full rebuild sees nothing to do
    let stats = kb.ingest_incremental().unwrap();
    assert_eq!((stats.new, stats.updated, stats.removed), (0, 0, 0));
}
