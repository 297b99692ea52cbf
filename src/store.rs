//! # Vector store
//!
//! The on-disk KV store backing message records. Three named `sled` trees
//! ("buckets") hold the state:
//!
//! - `vectors`  — key `vec:<id>`  → comma-separated floats ([`crate::kvcodec`])
//! - `metadata` — key `meta:<id>` → restricted-JSON metadata
//! - `index`    — key `all_ids`  → comma-separated id registry, insertion
//!   order, deduplicated
//!
//! `sled` gives us crash-safe ordered KV with named trees for free, which
//! matches the persisted-state layout directly rather than bolting named
//! buckets onto a single flat namespace.

use std::path::Path;

use thiserror::Error;

use crate::kvcodec::{self, MetaRecord};
use crate::vecmath;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("id not found: {0}")]
    NotFound(String),
    #[error("invalid vector for id {0}")]
    InvalidVector(String),
    #[error("id must not be empty")]
    EmptyId,
    #[error("backend error: {0}")]
    Backend(#[from] sled::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored message record: the triple the invariants in the data model
/// require to exist together for every id.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: MetaRecord,
}

pub struct VectorStore {
    vectors: sled::Tree,
    metadata: sled::Tree,
    index: sled::Tree,
}

const ALL_IDS_KEY: &[u8] = b"all_ids";

impl VectorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            vectors: db.open_tree("vectors")?,
            metadata: db.open_tree("metadata")?,
            index: db.open_tree("index")?,
        })
    }

    /// Open a temporary in-memory-backed store, for tests.
    #[cfg(test)]
    pub fn open_temp() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            vectors: db.open_tree("vectors")?,
            metadata: db.open_tree("metadata")?,
            index: db.open_tree("index")?,
        })
    }

    fn registry(&self) -> Result<Vec<String>> {
        match self.index.get(ALL_IDS_KEY)? {
            Some(bytes) => {
                let s = String::from_utf8_lossy(&bytes);
                if s.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(s.split(',').map(|x| x.to_string()).collect())
                }
            }
            None => Ok(Vec::new()),
        }
    }

    fn write_registry(&self, ids: &[String]) -> Result<()> {
        self.index.insert(ALL_IDS_KEY, ids.join(",").as_bytes())?;
        Ok(())
    }

    /// Insert or overwrite a record. Idempotent: re-inserting an existing id
    /// overwrites its vector/metadata without duplicating the registry entry.
    pub fn put(&self, id: &str, vector: &[f32], meta: &MetaRecord) -> Result<()> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        if !vecmath::is_valid(vector) {
            return Err(StoreError::InvalidVector(id.to_string()));
        }
        self.vectors
            .insert(format!("vec:{id}"), kvcodec::serialise_vector(vector).as_bytes())?;
        self.metadata
            .insert(format!("meta:{id}"), kvcodec::serialise_metadata(meta).as_bytes())?;

        let mut ids = self.registry()?;
        if !ids.iter().any(|x| x == id) {
            ids.push(id.to_string());
            self.write_registry(&ids)?;
        }
        Ok(())
    }

    /// Best-effort batch insert. Returns the count of entries that were
    /// successfully written; a failure on one entry doesn't abort the rest.
    pub fn put_batch(&self, entries: &[(String, Vec<f32>, MetaRecord)]) -> usize {
        let mut n = 0;
        for (id, v, m) in entries {
            if self.put(id, v, m).is_ok() {
                n += 1;
            }
        }
        n
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        let vbytes = self
            .vectors
            .get(format!("vec:{id}"))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let vector = kvcodec::deserialise_vector(&String::from_utf8_lossy(&vbytes))
            .ok_or_else(|| StoreError::InvalidVector(id.to_string()))?;
        let metadata = self
            .metadata
            .get(format!("meta:{id}"))?
            .and_then(|b| kvcodec::deserialise_metadata(&String::from_utf8_lossy(&b)))
            .unwrap_or_default();
        Ok(Record {
            id: id.to_string(),
            vector,
            metadata,
        })
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.vectors.contains_key(format!("vec:{id}"))?)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.vectors.remove(format!("vec:{id}"))?;
        self.metadata.remove(format!("meta:{id}"))?;
        let ids: Vec<String> = self.registry()?.into_iter().filter(|x| x != id).collect();
        self.write_registry(&ids)?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.registry()?.len())
    }

    pub fn all_ids(&self) -> Result<Vec<String>> {
        self.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MetaRecord {
        MetaRecord::new()
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = VectorStore::open_temp().unwrap();
        store.put("a", &[1.0, 2.0], &meta()).unwrap();
        let rec = store.get("a").unwrap();
        assert_eq!(rec.vector, vec![1.0, 2.0]);
    }

    #[test]
    fn put_rejects_empty_id() {
        let store = VectorStore::open_temp().unwrap();
        assert!(matches!(
            store.put("", &[1.0], &meta()),
            Err(StoreError::EmptyId)
        ));
    }

    #[test]
    fn put_rejects_invalid_vector() {
        let store = VectorStore::open_temp().unwrap();
        assert!(store.put("a", &[], &meta()).is_err());
        assert!(store.put("a", &[f32::NAN], &meta()).is_err());
    }

    #[test]
    fn count_matches_registry_cardinality() {
        let store = VectorStore::open_temp().unwrap();
        store.put("a", &[1.0], &meta()).unwrap();
        store.put("b", &[2.0], &meta()).unwrap();
        store.put("a", &[3.0], &meta()).unwrap(); // idempotent overwrite
        assert_eq!(store.count().unwrap(), 2);
        store.delete("a").unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn get_missing_id_is_not_found() {
        let store = VectorStore::open_temp().unwrap();
        assert!(matches!(store.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn put_batch_is_best_effort() {
        let store = VectorStore::open_temp().unwrap();
        let entries = vec![
            ("a".to_string(), vec![1.0], meta()),
            ("".to_string(), vec![1.0], meta()), // invalid, should not abort batch
            ("b".to_string(), vec![2.0], meta()),
        ];
        let n = store.put_batch(&entries);
        assert_eq!(n, 2);
    }
}
