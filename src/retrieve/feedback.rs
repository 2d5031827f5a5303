//! Like/dislike feedback: SQLite-backed counters and the score reranker
//! that folds them into the final ranking.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

use crate::config::FeedbackConfig;
use crate::retrieve::Citation;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Accumulated like/dislike counters keyed by chunk id.
pub trait FeedbackStore: Send + Sync {
    /// Like percentage per chunk id, in one batched lookup. Ids with no
    /// recorded feedback are absent from the map.
    fn like_percentages(&self, chunk_ids: &[String]) -> Result<HashMap<String, f64>, FeedbackError>;

    /// Record one like (or dislike) for a chunk.
    fn record(&self, chunk_id: &str, liked: bool) -> Result<(), FeedbackError>;
}

const FEEDBACK_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feedback (
    chunk_id TEXT PRIMARY KEY,
    likes    INTEGER NOT NULL DEFAULT 0,
    dislikes INTEGER NOT NULL DEFAULT 0
);
";

pub struct SqliteFeedbackStore {
    conn: Mutex<Connection>,
}

impl SqliteFeedbackStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FeedbackError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(FEEDBACK_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, FeedbackError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(FEEDBACK_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FeedbackStore for SqliteFeedbackStore {
    fn like_percentages(&self, chunk_ids: &[String]) -> Result<HashMap<String, f64>, FeedbackError> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn();
        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!(
            "SELECT chunk_id, likes, dislikes FROM feedback WHERE chunk_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;

        let params: Vec<&dyn rusqlite::types::ToSql> =
            chunk_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), |row| {
            let chunk_id: String = row.get(0)?;
            let likes: i64 = row.get(1)?;
            let dislikes: i64 = row.get(2)?;
            Ok((chunk_id, likes, dislikes))
        })?;

        let mut result = HashMap::new();
        for row in rows {
            let (chunk_id, likes, dislikes) = row?;
            let total = likes + dislikes;
            if total > 0 {
                result.insert(chunk_id, likes as f64 * 100.0 / total as f64);
            }
        }
        Ok(result)
    }

    fn record(&self, chunk_id: &str, liked: bool) -> Result<(), FeedbackError> {
        let (like_inc, dislike_inc) = if liked { (1, 0) } else { (0, 1) };
        self.conn().execute(
            "INSERT INTO feedback (chunk_id, likes, dislikes) VALUES (?1, ?2, ?3)
             ON CONFLICT(chunk_id) DO UPDATE SET
                 likes = likes + ?2,
                 dislikes = dislikes + ?3",
            rusqlite::params![chunk_id, like_inc, dislike_inc],
        )?;
        Ok(())
    }
}

/// Applies feedback-derived boosts to fused scores and re-sorts.
pub struct FeedbackReranker {
    store: Arc<dyn FeedbackStore>,
    config: FeedbackConfig,
}

impl FeedbackReranker {
    pub fn new(store: Arc<dyn FeedbackStore>, config: FeedbackConfig) -> Self {
        Self { store, config }
    }

    /// Boost multiplier for a like percentage. Thresholds and magnitudes
    /// come from [`FeedbackConfig`]; with the defaults: `> 70 → +0.3`,
    /// `[40, 70] → +0.1`, `< 40 → −0.2`, no feedback → `0.0`.
    pub fn boost(&self, like_percentage: Option<f64>) -> f64 {
        match like_percentage {
            None => 0.0,
            Some(p) if p > self.config.high_threshold => self.config.high_boost,
            Some(p) if p >= self.config.low_threshold => self.config.mid_boost,
            Some(_) => self.config.low_penalty,
        }
    }

    /// Apply `new_score = score * (1 + boost)` to every citation and sort
    /// descending, ties keeping their original order.
    ///
    /// A failing feedback store degrades silently: one warning, zero boost
    /// everywhere.
    pub fn rerank(&self, mut citations: Vec<Citation>) -> Vec<Citation> {
        if citations.is_empty() {
            return citations;
        }

        let ids: Vec<String> = citations.iter().map(|c| c.chunk_id.clone()).collect();
        let percentages = match self.store.like_percentages(&ids) {
            Ok(map) => map,
            Err(e) => {
                warn!("Feedback store unavailable, skipping rerank boosts: {e}");
                HashMap::new()
            }
        };

        for citation in &mut citations {
            let like = percentages.get(&citation.chunk_id).copied();
            citation.like_percentage = like;
            citation.score = (citation.score as f64 * (1.0 + self.boost(like))) as f32;
        }

        citations.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        citations
    }
}
