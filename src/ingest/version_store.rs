//! Persisted mapping of document identity to content hash, used to detect
//! added/changed/removed documents between ingestion runs.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum VersionStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt version store: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// SHA-256 hex digest of raw document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub content_hash: String,
    pub last_indexed_at: DateTime<Utc>,
}

/// Outcome of diffing the current corpus against the persisted records.
#[derive(Debug, Default, PartialEq)]
pub struct DiffResult {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Durable `doc_id -> VersionRecord` map in a single JSON file.
///
/// A record for a document exists iff that document's chunks are present in
/// both indexes: callers commit only after index writes succeed, and the
/// file is rewritten atomically on every mutation.
pub struct VersionStore {
    path: PathBuf,
    records: BTreeMap<String, VersionRecord>,
}

impl VersionStore {
    /// Load the store from `path`, starting empty if the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VersionStoreError> {
        let path = path.as_ref();
        let records = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            info!("{} not found, starting with empty version store", path.display());
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Compare current `doc_id -> content_hash` pairs against the persisted
    /// records.
    pub fn diff(&self, current: &BTreeMap<String, String>) -> DiffResult {
        let mut result = DiffResult::default();

        for (doc_id, hash) in current {
            match self.records.get(doc_id) {
                None => result.new.push(doc_id.clone()),
                Some(record) if record.content_hash != *hash => {
                    result.updated.push(doc_id.clone());
                }
                Some(_) => {}
            }
        }
        for doc_id in self.records.keys() {
            if !current.contains_key(doc_id) {
                result.removed.push(doc_id.clone());
            }
        }

        result
    }

    /// Record a successful indexing of `doc_id` and persist immediately.
    ///
    /// Must only be called after both index writes for the document have
    /// succeeded (writes are ordered index-first, version-record-last).
    pub fn commit(&mut self, doc_id: &str, hash: &str) -> Result<(), VersionStoreError> {
        self.records.insert(
            doc_id.to_string(),
            VersionRecord {
                content_hash: hash.to_string(),
                last_indexed_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Drop the record for a removed document and persist immediately.
    pub fn remove(&mut self, doc_id: &str) -> Result<(), VersionStoreError> {
        self.records.remove(doc_id);
        self.save()
    }

    /// Forget every record and persist the empty store.
    pub fn clear(&mut self) -> Result<(), VersionStoreError> {
        self.records.clear();
        self.save()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.records.contains_key(doc_id)
    }

    pub fn get(&self, doc_id: &str) -> Option<&VersionRecord> {
        self.records.get(doc_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Atomically rewrite the backing file: write a sibling temp file, then
    /// rename over the target.
    fn save(&self) -> Result<(), VersionStoreError> {
        let data = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
