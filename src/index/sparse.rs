//! Sparse index backed by SQLite FTS5 with BM25 ranking.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{Connection, params};
use tracing::info;

use super::{IndexError, IndexedChunk, Origin, SearchFilter, SearchHit, SparseIndex, filter_clauses};

const SCHEMA_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS fts_chunks USING fts5(
    content,
    chunk_id UNINDEXED,
    doc_id UNINDEXED,
    title UNINDEXED,
    section_path UNINDEXED,
    start_offset UNINDEXED,
    end_offset UNINDEXED
);
"#;

/// Keyword store over an FTS5 virtual table; `bm25()` rank is negated so
/// higher scores are better, matching the dense index convention.
pub struct SqliteSparseIndex {
    conn: Mutex<Connection>,
}

impl SqliteSparseIndex {
    /// Open (or create) the index at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref();
        info!("Initializing sparse index: {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock still holds a usable connection
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Build an FTS5 MATCH expression from free text.
///
/// Raw user input is not valid FTS5 query syntax; each token is quoted and
/// tokens are OR-ed so any keyword overlap matches.
fn match_expression(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

impl SparseIndex for SqliteSparseIndex {
    fn upsert(&self, chunks: &[IndexedChunk]) -> Result<(), IndexError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for chunk in chunks {
            // FTS5 tables have no UNIQUE constraints; delete-then-insert
            // keeps the upsert idempotent
            tx.execute(
                "DELETE FROM fts_chunks WHERE chunk_id = ?",
                params![chunk.chunk_id],
            )?;
            tx.execute(
                r#"
                INSERT INTO fts_chunks (content, chunk_id, doc_id, title, section_path, start_offset, end_offset)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    chunk.text,
                    chunk.chunk_id,
                    chunk.doc_id,
                    chunk.title,
                    chunk.section_path,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_document(&self, doc_id: &str) -> Result<usize, IndexError> {
        let removed = self
            .conn()
            .execute("DELETE FROM fts_chunks WHERE doc_id = ?", params![doc_id])?;
        Ok(removed)
    }

    fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let Some(expr) = match_expression(text) else {
            return Ok(Vec::new());
        };

        let mut query = String::from(
            r#"
            SELECT
                chunk_id,
                doc_id,
                title,
                section_path,
                content,
                bm25(fts_chunks) as rank
            FROM fts_chunks
            WHERE fts_chunks MATCH ?
            "#,
        );

        let mut where_clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Text(expr)];

        if let Some(f) = filter {
            filter_clauses(f, &mut where_clauses, &mut params);
        }

        for clause in &where_clauses {
            query.push_str(" AND ");
            query.push_str(clause);
        }

        query.push_str(" ORDER BY rank LIMIT ?");
        params.push(Value::Integer(k as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let conn = self.conn();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let rank: f64 = row.get(5)?;
            Ok(SearchHit {
                chunk_id: row.get(0)?,
                doc_id: row.get(1)?,
                title: row.get(2)?,
                section_path: row.get(3)?,
                text: row.get(4)?,
                // bm25() is smaller-is-better and negative for matches
                score: (-rank) as f32,
                origin: Origin::Sparse,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        Ok(hits)
    }

    fn clear(&self) -> Result<(), IndexError> {
        self.conn().execute("DELETE FROM fts_chunks", [])?;
        Ok(())
    }

    fn chunk_count(&self, doc_id: &str) -> Result<usize, IndexError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM fts_chunks WHERE doc_id = ?",
            params![doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(chunk_id: &str, doc_id: &str, text: &str) -> IndexedChunk {
        IndexedChunk {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            title: "Test".to_string(),
            section_path: String::new(),
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(
            match_expression("borrow checker?").as_deref(),
            Some("\"borrow\" OR \"checker\"")
        );
        assert_eq!(match_expression("  ??!  "), None);
    }

    #[test]
    fn test_keyword_query_ranks_matching_chunk_first() {
        let index = SqliteSparseIndex::open_in_memory().unwrap();
        index
            .upsert(&[
                chunk("a.md#0", "a.md", "the borrow checker enforces ownership"),
                chunk("b.md#0", "b.md", "sourdough bread needs a long fermentation"),
            ])
            .unwrap();

        let hits = index.query("borrow checker", 10, None).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "a.md#0");
        assert_eq!(hits[0].origin, Origin::Sparse);
        assert!(hits[0].score > 0.0, "bm25 match should yield positive score");
    }

    #[test]
    fn test_empty_query_returns_no_hits() {
        let index = SqliteSparseIndex::open_in_memory().unwrap();
        index
            .upsert(&[chunk("a.md#0", "a.md", "some content")])
            .unwrap();
        assert!(index.query("", 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let index = SqliteSparseIndex::open_in_memory().unwrap();
        let chunks = [chunk("a.md#0", "a.md", "repeated ingestion of a chunk")];

        index.upsert(&chunks).unwrap();
        index.upsert(&chunks).unwrap();

        assert_eq!(index.chunk_count("a.md").unwrap(), 1);
    }

    #[test]
    fn test_delete_document_removes_all_chunks() {
        let index = SqliteSparseIndex::open_in_memory().unwrap();
        index
            .upsert(&[
                chunk("a.md#0", "a.md", "first part of the document"),
                chunk("a.md#1", "a.md", "second part of the document"),
                chunk("b.md#0", "b.md", "unrelated document"),
            ])
            .unwrap();

        let removed = index.delete_document("a.md").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.chunk_count("a.md").unwrap(), 0);

        let hits = index.query("document", 10, None).unwrap();
        assert!(hits.iter().all(|h| h.doc_id == "b.md"));
    }

    #[test]
    fn test_query_with_file_pattern_filter() {
        let index = SqliteSparseIndex::open_in_memory().unwrap();
        index
            .upsert(&[
                chunk("docs/api.md#0", "docs/api.md", "endpoint reference"),
                chunk("notes.txt#0", "notes.txt", "endpoint scratchpad"),
            ])
            .unwrap();

        let filter = SearchFilter {
            directory: None,
            file_pattern: Some("*.md".to_string()),
        };
        let hits = index.query("endpoint", 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "docs/api.md");
    }
}
