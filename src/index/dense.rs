//! Dense index backed by SQLite and sqlite-vec.
use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once};

use rusqlite::types::Value;
use rusqlite::{Connection, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::info;

use super::{DenseIndex, IndexError, IndexedChunk, Origin, SearchFilter, SearchHit, filter_clauses};

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL UNIQUE,
    doc_id TEXT NOT NULL,
    title TEXT NOT NULL,
    section_path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dense_doc_id ON chunks(doc_id);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

/// Vector store over a `vec0` virtual table, one embedding per chunk,
/// joined to a metadata table by rowid.
pub struct SqliteDenseIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteDenseIndex {
    /// Open (or create) the index at the given path.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, IndexError> {
        let path = path.as_ref();
        info!("Initializing dense index: {}", path.display());

        init_sqlite_vec();

        let conn = Connection::open(path)?;
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(&schema_sql(dimensions))?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema_sql(dimensions))?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock still holds a usable connection
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

impl DenseIndex for SqliteDenseIndex {
    fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::UnpairedInput {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            debug_assert_eq!(vector.len(), self.dimensions);

            // Virtual table rows are not covered by ON CONFLICT, so clear
            // any existing embedding for this chunk id first
            tx.execute(
                "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE chunk_id = ?)",
                params![chunk.chunk_id],
            )?;

            let row_id: i64 = tx.query_row(
                r#"
                INSERT INTO chunks (chunk_id, doc_id, title, section_path, content, start_offset, end_offset)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    title = excluded.title,
                    section_path = excluded.section_path,
                    content = excluded.content,
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset
                RETURNING id
                "#,
                params![
                    chunk.chunk_id,
                    chunk.doc_id,
                    chunk.title,
                    chunk.section_path,
                    chunk.text,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                ],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![row_id, serialize_vector(vector)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_document(&self, doc_id: &str) -> Result<usize, IndexError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE doc_id = ?)",
            params![doc_id],
        )?;
        let removed = tx.execute("DELETE FROM chunks WHERE doc_id = ?", params![doc_id])?;

        tx.commit()?;
        Ok(removed)
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let mut query = String::from(
            r#"
            SELECT
                c.chunk_id,
                c.doc_id,
                c.title,
                c.section_path,
                c.content,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            "#,
        );

        let mut where_clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(vector))];

        if let Some(f) = filter {
            filter_clauses(f, &mut where_clauses, &mut params);
        }

        if !where_clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&where_clauses.join(" AND "));
        }

        query.push_str(" ORDER BY distance ASC LIMIT ?");
        params.push(Value::Integer(k as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let conn = self.conn();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let distance: f64 = row.get(5)?;
            Ok(SearchHit {
                chunk_id: row.get(0)?,
                doc_id: row.get(1)?,
                title: row.get(2)?,
                section_path: row.get(3)?,
                text: row.get(4)?,
                // Cosine distance is in [0, 2]; map to a [0, 1] similarity
                score: (1.0 - distance / 2.0) as f32,
                origin: Origin::Dense,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        Ok(hits)
    }

    fn clear(&self) -> Result<(), IndexError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vec_chunks", [])?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.commit()?;
        Ok(())
    }

    fn chunk_count(&self, doc_id: &str) -> Result<usize, IndexError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chunks WHERE doc_id = ?",
            params![doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
