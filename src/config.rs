/// Configuration module for kbfuse.
///
/// Handles loading, validating, and providing default configuration values.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_document_patterns() -> Vec<String> {
    vec!["./documents".to_string()]
}

fn default_dense_index_path() -> String {
    "./kb-dense.db".to_string()
}

fn default_sparse_index_path() -> String {
    "./kb-sparse.db".to_string()
}

fn default_feedback_db_path() -> String {
    "./kb-feedback.db".to_string()
}

fn default_version_store_path() -> String {
    "./kb-versions.json".to_string()
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_search_top_k() -> usize {
    5
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_score_threshold() -> f32 {
    0.25
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_max_concurrency() -> usize {
    4
}

fn default_variant_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_num_variants() -> usize {
    3
}

fn default_high_threshold() -> f64 {
    70.0
}

fn default_low_threshold() -> f64 {
    40.0
}

fn default_high_boost() -> f64 {
    0.3
}

fn default_mid_boost() -> f64 {
    0.1
}

fn default_low_penalty() -> f64 {
    -0.2
}

fn default_model_name() -> String {
    "multilingual-e5-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_document_patterns")]
    pub document_patterns: Vec<String>,

    #[serde(default = "default_dense_index_path")]
    pub dense_index_path: String,

    #[serde(default = "default_sparse_index_path")]
    pub sparse_index_path: String,

    #[serde(default = "default_feedback_db_path")]
    pub feedback_db_path: String,

    #[serde(default = "default_version_store_path")]
    pub version_store_path: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Embedding HTTP endpoint. When absent the deterministic local
    /// embedder is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_url: Option<String>,

    /// Completion HTTP endpoint, used only for query-expansion phrasing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_url: Option<String>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Fused-score floor; candidates below it are dropped before merging.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Each engine is asked for `top_k * candidate_multiplier` hits so
    /// fusion and dedup have enough candidates to work with.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Upper bound on query variants searched concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for the variant fan-out; variants still running when it
    /// expires are dropped and the merge proceeds with what completed.
    #[serde(default = "default_variant_timeout_ms")]
    pub variant_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExpansionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_num_variants")]
    pub num_variants: usize,
}

/// Feedback boost thresholds and magnitudes.
///
/// Business constants, kept configurable rather than baked in as literals.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedbackConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    #[serde(default = "default_high_boost")]
    pub high_boost: f64,

    #[serde(default = "default_mid_boost")]
    pub mid_boost: f64,

    #[serde(default = "default_low_penalty")]
    pub low_penalty: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            document_patterns: default_document_patterns(),
            dense_index_path: default_dense_index_path(),
            sparse_index_path: default_sparse_index_path(),
            feedback_db_path: default_feedback_db_path(),
            version_store_path: default_version_store_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_search_top_k(),
            embedding_url: None,
            generation_url: None,
            retrieval: RetrievalConfig::default(),
            expansion: ExpansionConfig::default(),
            feedback: FeedbackConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            score_threshold: default_score_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            max_concurrency: default_max_concurrency(),
            variant_timeout_ms: default_variant_timeout_ms(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            num_variants: default_num_variants(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            high_boost: default_high_boost(),
            mid_boost: default_mid_boost(),
            low_penalty: default_low_penalty(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        if cfg.document_patterns.is_empty() {
            cfg.document_patterns = default_document_patterns();
        }

        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.document_patterns.is_empty(),
            "at least one document pattern must be specified"
        );
        anyhow::ensure!(
            self.retrieval.vector_weight >= 0.0 && self.retrieval.keyword_weight >= 0.0,
            "retrieval weights must be non-negative"
        );
        anyhow::ensure!(
            self.retrieval.vector_weight + self.retrieval.keyword_weight > 0.0,
            "at least one retrieval weight must be positive"
        );
        anyhow::ensure!(
            self.retrieval.candidate_multiplier >= 1,
            "retrieval.candidate_multiplier must be at least 1"
        );
        anyhow::ensure!(
            self.retrieval.max_concurrency >= 1,
            "retrieval.max_concurrency must be at least 1"
        );
        anyhow::ensure!(
            self.feedback.low_threshold <= self.feedback.high_threshold,
            "feedback.low_threshold must not exceed feedback.high_threshold"
        );
        Ok(())
    }

    /// Expand all document patterns and return matching source files.
    pub fn get_document_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = HashSet::new();

        for pattern in &self.document_patterns {
            match expand_pattern(pattern) {
                Ok(matches) => {
                    for m in matches {
                        files.insert(m);
                    }
                }
                Err(e) => {
                    warn!("Failed to expand pattern {pattern}: {e}");
                }
            }
        }

        Ok(files.into_iter().collect())
    }

    /// Return the base directories derived from all patterns.
    #[must_use]
    pub fn get_base_directories(&self) -> Vec<PathBuf> {
        let mut dirs = HashSet::new();

        for pattern in &self.document_patterns {
            let base = extract_base_dir(pattern);
            if let Ok(abs) = std::path::absolute(Path::new(&base)) {
                dirs.insert(abs);
            }
        }

        dirs.into_iter().collect()
    }
}

// ── Pattern helpers ──────────────────────────────────────────────────

/// File extensions treated as source documents: one file = one document.
pub fn is_supported_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md" | "txt")
    )
}

/// Expand a single pattern to matching document files.
fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    // If pattern contains no wildcards, treat as a directory
    if !pattern.contains('*') && !pattern.contains('?') {
        return walk_dir_for_documents(Path::new(pattern));
    }

    // Handle ** (recursive glob)
    if pattern.contains("**") {
        return expand_double_star(pattern);
    }

    // Simple glob
    let matches = glob::glob(pattern).context("invalid glob pattern")?;
    let mut files = Vec::new();
    for entry in matches.flatten() {
        if entry.is_file() && is_supported_document(&entry) {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Walk a directory recursively, collecting supported document files.
fn walk_dir_for_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in walkdir(dir) {
        if entry.is_file() && is_supported_document(&entry) {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Recursive directory walk honoring .gitignore and hidden-file rules.
fn walkdir(dir: &Path) -> Vec<PathBuf> {
    let mut result = Vec::new();
    if !dir.is_dir() {
        return result;
    }
    for entry in ignore::WalkBuilder::new(dir)
        .follow_links(false)
        .build()
        .flatten()
    {
        if entry.file_type().is_some_and(|t| t.is_file()) {
            result.push(entry.into_path());
        }
    }
    result
}

/// Expand patterns containing `**`.
fn expand_double_star(pattern: &str) -> Result<Vec<PathBuf>> {
    let parts: Vec<&str> = pattern.splitn(2, "**").collect();
    if parts.len() != 2 {
        anyhow::bail!("invalid ** pattern: {pattern}");
    }

    let mut base_dir = parts[0].to_string();
    let suffix = parts[1].trim_start_matches(['/', '\\']);

    if base_dir.is_empty() {
        base_dir = ".".to_string();
    } else {
        base_dir = base_dir.trim_end_matches(['/', '\\']).to_string();
    }

    let all_files = walkdir(Path::new(&base_dir));
    let mut files = Vec::new();

    for path in all_files {
        if !path.is_file() || !is_supported_document(&path) {
            continue;
        }

        if suffix.is_empty() {
            files.push(path);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            let matched = glob::Pattern::new(suffix)
                .map(|p| p.matches(name))
                .unwrap_or(false);
            if matched {
                files.push(path);
            }
        }
    }

    Ok(files)
}

/// Extract the base directory from a pattern (part before first wildcard).
fn extract_base_dir(pattern: &str) -> String {
    if let Some(idx) = pattern.find(['*', '?']) {
        let prefix = &pattern[..idx];
        // Trim trailing separators so Path::parent behaves correctly on Windows
        let trimmed = prefix.trim_end_matches(['/', '\\']);
        if trimmed.is_empty() {
            return ".".to_string();
        }
        let trimmed_path = Path::new(trimmed);
        // If the original prefix ended with a separator, `trimmed` IS the directory
        if prefix.len() > trimmed.len() {
            return trimmed.to_string();
        }
        trimmed_path
            .parent()
            .map(|p| {
                let s = p.to_string_lossy().to_string();
                if s.is_empty() { ".".to_string() } else { s }
            })
            .unwrap_or_else(|| ".".to_string())
    } else {
        pattern.to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.model.dimensions, 384);
        assert!((config.retrieval.vector_weight - 0.7).abs() < f32::EPSILON);
        assert!((config.retrieval.keyword_weight - 0.3).abs() < f32::EPSILON);
        assert!(config.expansion.enabled);
        assert_eq!(config.expansion.num_variants, 3);
        assert!((config.feedback.high_threshold - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"chunk_size": 1000, "dense_index_path": "./test.db"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.dense_index_path, "./test.db");
        // Other fields should have defaults
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.model.dimensions, 384);
    }

    #[test]
    fn test_nested_section_defaults() {
        let json = r#"{"retrieval": {"vector_weight": 0.5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!((config.retrieval.vector_weight - 0.5).abs() < f32::EPSILON);
        // Untouched nested fields keep their defaults
        assert!((config.retrieval.keyword_weight - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.max_concurrency, 4);
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_chunk_size() {
        let mut config = Config::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_overlap_exceeds_budget() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_weights() {
        let mut config = Config::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.keyword_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_inverted_feedback_thresholds() {
        let mut config = Config::default();
        config.feedback.low_threshold = 80.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_patterns() {
        let mut config = Config::default();
        config.document_patterns = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_double_star_suffix_constrains_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "plain notes").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.md"), "# C").unwrap();

        let mut config = Config::default();
        config.document_patterns = vec![format!("{}/**/*.md", dir.path().display())];

        let files = config.get_document_files().unwrap();
        assert!(files.iter().any(|p| p.ends_with("a.md")));
        assert!(files.iter().any(|p| p.ends_with("sub/c.md")));
        assert!(
            !files.iter().any(|p| p.ends_with("b.txt")),
            "a *.md pattern must not pick up .txt files"
        );
    }

    #[test]
    fn test_double_star_without_suffix_takes_all_supported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "plain notes").unwrap();

        let mut config = Config::default();
        config.document_patterns = vec![format!("{}/**", dir.path().display())];

        let files = config.get_document_files().unwrap();
        assert!(files.iter().any(|p| p.ends_with("a.md")));
        assert!(files.iter().any(|p| p.ends_with("b.txt")));
    }

    #[test]
    fn test_extract_base_dir() {
        assert_eq!(extract_base_dir("./docs"), "./docs");
        assert_eq!(extract_base_dir("./docs/**/*.md"), "./docs");
        assert_eq!(extract_base_dir("*.md"), ".");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunk_size, config.chunk_size);
        assert_eq!(parsed.dense_index_path, config.dense_index_path);
        assert_eq!(parsed.model.name, config.model.name);
    }
}
