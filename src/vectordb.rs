//! # Vector DB facade
//!
//! Combines [`crate::store`], [`crate::lsh`], and [`crate::metaindex`] behind a
//! single API and chooses between the two search paths:
//!
//! - **LSH path** — when an LSH index is configured and none of the query's
//!   filter keys match `timestamp_*`, `*_text`, or `*_range`: union candidate
//!   buckets, evaluate true cosine similarity for the top
//!   `min(3 * limit, 100)` candidates, filter by threshold.
//! - **Scan path** — otherwise: compute the candidate id set via the metadata
//!   index, then cosine-scan only those ids.
//!
//! Reads and writes are serialised through a single `RwLock` guarding the LSH
//! index and metadata index (the store itself, `sled`, is already internally
//! concurrent); rebuilds take the write half of that lock.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::kvcodec::{MetaRecord, MetaValue};
use crate::lsh::{LshConfig, LshIndex};
use crate::metaindex::{parse_filter, Filter, MetadataIndex};
use crate::store::{Record, StoreError, VectorStore};
use crate::vecmath;

#[derive(Debug, Error)]
pub enum VectorDbError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("lsh dimension mismatch: {0}")]
    Lsh(String),
}

pub type Result<T> = std::result::Result<T, VectorDbError>;

pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub threshold: f32,
    pub filters: HashMap<String, MetaValue>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub similarity: f32,
    pub metadata: MetaRecord,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid_ids: Vec<String>,
    pub integrity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorDbStats {
    pub count: usize,
    pub lsh_enabled: bool,
    pub lsh_tables: usize,
}

struct Indexes {
    lsh: Option<LshIndex>,
    meta: MetadataIndex,
}

pub struct VectorDb {
    store: VectorStore,
    indexes: RwLock<Indexes>,
}

impl VectorDb {
    pub fn open(
        path: impl AsRef<std::path::Path>,
        dimension: Option<usize>,
        lsh_config: Option<LshConfig>,
    ) -> Result<Self> {
        let store = VectorStore::open(path)?;
        let lsh = match (dimension, lsh_config) {
            (Some(dim), Some(cfg)) => Some(LshIndex::new(dim, cfg)),
            _ => None,
        };
        let mut meta = MetadataIndex::new();
        meta.declare_field("channel", crate::metaindex::FieldKind::Exact);
        meta.declare_field("user_id", crate::metaindex::FieldKind::Exact);
        meta.declare_field("thread_id", crate::metaindex::FieldKind::Exact);
        meta.declare_field("privacy_level", crate::metaindex::FieldKind::Exact);
        meta.declare_field("embedding_method", crate::metaindex::FieldKind::Exact);
        meta.declare_field("timestamp", crate::metaindex::FieldKind::Range);
        meta.declare_field("text", crate::metaindex::FieldKind::Text);

        // Backfill the metadata index for anything already on disk (e.g.
        // reopening a store from a previous process). The LSH index is
        // rebuilt wholesale below instead, since hashing happens per table.
        for id in store.all_ids()? {
            if let Ok(rec) = store.get(&id) {
                meta.index_record(&id, &rec.metadata);
            }
        }
        let mut indexes = Indexes { lsh, meta };
        if let Some(l) = indexes.lsh.as_mut() {
            let entries: Vec<(String, Vec<f32>)> = store
                .all_ids()?
                .into_iter()
                .filter_map(|id| store.get(&id).ok().map(|r| (r.id, r.vector)))
                .collect();
            let dim = l.dimension();
            l.rebuild(dim, &entries);
        }

        Ok(Self {
            store,
            indexes: RwLock::new(indexes),
        })
    }

    #[cfg(test)]
    pub fn open_temp(dimension: Option<usize>, lsh_config: Option<LshConfig>) -> Result<Self> {
        let store = VectorStore::open_temp()?;
        let lsh = match (dimension, lsh_config) {
            (Some(dim), Some(cfg)) => Some(LshIndex::new(dim, cfg)),
            _ => None,
        };
        let mut meta = MetadataIndex::new();
        meta.declare_field("channel", crate::metaindex::FieldKind::Exact);
        meta.declare_field("user_id", crate::metaindex::FieldKind::Exact);
        meta.declare_field("thread_id", crate::metaindex::FieldKind::Exact);
        meta.declare_field("privacy_level", crate::metaindex::FieldKind::Exact);
        meta.declare_field("embedding_method", crate::metaindex::FieldKind::Exact);
        meta.declare_field("timestamp", crate::metaindex::FieldKind::Range);
        meta.declare_field("text", crate::metaindex::FieldKind::Text);
        Ok(Self {
            store,
            indexes: RwLock::new(Indexes { lsh, meta }),
        })
    }

    pub fn insert(&self, id: &str, vector: &[f32], meta: &MetaRecord) -> Result<()> {
        self.store.put(id, vector, meta)?;
        let mut idx = self.indexes.write().unwrap();
        idx.meta.index_record(id, meta);
        if let Some(l) = idx.lsh.as_mut() {
            let _ = l.insert(id, vector);
        }
        Ok(())
    }

    pub fn insert_batch(&self, entries: &[(String, Vec<f32>, MetaRecord)]) -> usize {
        let mut n = 0;
        for (id, v, m) in entries {
            if self.insert(id, v, m).is_ok() {
                n += 1;
            }
        }
        n
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        Ok(self.store.get(id)?)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.store.exists(id)?)
    }

    /// Replace a record's metadata (vector is unchanged). Re-indexes the
    /// metadata and text/exact/range buckets accordingly.
    pub fn update(&self, id: &str, changes: MetaRecord) -> Result<()> {
        let rec = self.store.get(id)?;
        let mut new_meta = rec.metadata.clone();
        for (k, v) in changes {
            new_meta.insert(k, v);
        }
        self.store.put(id, &rec.vector, &new_meta)?;
        let mut idx = self.indexes.write().unwrap();
        idx.meta.remove_record(id, &rec.metadata);
        idx.meta.index_record(id, &new_meta);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let rec = self.store.get(id);
        self.store.delete(id)?;
        let mut idx = self.indexes.write().unwrap();
        if let Ok(rec) = rec {
            idx.meta.remove_record(id, &rec.metadata);
        }
        if let Some(l) = idx.lsh.as_mut() {
            l.remove(id);
        }
        Ok(())
    }

    pub fn delete_where(&self, filters: &HashMap<String, MetaValue>) -> Result<usize> {
        let ids = self.candidate_ids_for_filters(filters)?;
        let mut n = 0;
        for id in ids {
            if self.delete(&id).is_ok() {
                n += 1;
            }
        }
        Ok(n)
    }

    fn parsed_filters(filters: &HashMap<String, MetaValue>) -> Vec<Filter> {
        filters
            .iter()
            .filter_map(|(k, v)| parse_filter(k, v))
            .collect()
    }

    fn lsh_is_applicable(filters: &HashMap<String, MetaValue>) -> bool {
        !filters.keys().any(|k| {
            k.starts_with("timestamp_") || k.ends_with("_text") || k.ends_with("_range")
        })
    }

    fn candidate_ids_for_filters(&self, filters: &HashMap<String, MetaValue>) -> Result<Vec<String>> {
        let idx = self.indexes.read().unwrap();
        let all_ids = self.store.all_ids()?;
        let parsed = Self::parsed_filters(filters);
        Ok(idx.meta.filter_candidates(&parsed, &all_ids))
    }

    /// Evaluate true cosine similarity for `ids`, sorted descending, filtered
    /// by `threshold`, truncated to `limit`.
    fn rerank(&self, ids: &[String], query: &[f32], limit: usize, threshold: f32) -> Result<Vec<SearchResult>> {
        let mut scored: Vec<SearchResult> = Vec::new();
        for id in ids {
            if let Ok(rec) = self.store.get(id) {
                if rec.vector.len() != query.len() {
                    continue;
                }
                let sim = vecmath::cosine(query, &rec.vector);
                if sim >= threshold {
                    scored.push(SearchResult {
                        id: rec.id,
                        similarity: sim,
                        metadata: rec.metadata,
                    });
                }
            }
        }
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let parsed = Self::parsed_filters(&query.filters);
        let use_lsh = {
            let idx = self.indexes.read().unwrap();
            idx.lsh.is_some() && Self::lsh_is_applicable(&query.filters)
        };

        if use_lsh {
            let candidate_ids = {
                let idx = self.indexes.read().unwrap();
                let lsh = idx.lsh.as_ref().unwrap();
                match lsh.candidates(&query.vector) {
                    Ok(cands) => cands.into_iter().map(|c| c.id).collect::<Vec<_>>(),
                    Err(_) => return Ok(Vec::new()),
                }
            };
            // Apply non-deferred exact filters (if any) over the LSH universe,
            // then evaluate true cosine for the top min(3*limit, 100).
            let filtered = {
                let idx = self.indexes.read().unwrap();
                idx.meta.filter_candidates(&parsed, &candidate_ids)
            };
            let cap = (3 * query.limit).min(100);
            let top: Vec<String> = filtered.into_iter().take(cap).collect();
            let results = self.rerank(&top, &query.vector, query.limit, query.threshold)?;
            Ok(self.apply_not_filters(&parsed, results))
        } else {
            let candidate_ids = self.candidate_ids_for_filters(&query.filters)?;
            let results = self.rerank(&candidate_ids, &query.vector, query.limit, query.threshold)?;
            Ok(self.apply_not_filters(&parsed, results))
        }
    }

    fn apply_not_filters(&self, parsed: &[Filter], results: Vec<SearchResult>) -> Vec<SearchResult> {
        let nots: Vec<(&str, &MetaValue)> = parsed
            .iter()
            .filter_map(|f| match f {
                Filter::Not { field, value } => Some((field.as_str(), value)),
                _ => None,
            })
            .collect();
        if nots.is_empty() {
            return results;
        }
        results
            .into_iter()
            .filter(|r| nots.iter().all(|(field, value)| r.metadata.get(*field) != Some(*value)))
            .collect()
    }

    pub fn knn(&self, v: &[f32], k: usize, filters: &HashMap<String, MetaValue>) -> Result<Vec<SearchResult>> {
        self.search(&SearchQuery {
            vector: v.to_vec(),
            limit: k,
            threshold: 0.0,
            filters: filters.clone(),
        })
    }

    pub fn search_by_distance(
        &self,
        v: &[f32],
        max_distance: f32,
        filters: &HashMap<String, MetaValue>,
    ) -> Result<Vec<SearchResult>> {
        // Cosine similarity and cosine distance are complementary (1 - sim);
        // reuse the scan path with a similarity floor derived from the
        // requested distance ceiling.
        self.search(&SearchQuery {
            vector: v.to_vec(),
            limit: usize::MAX,
            threshold: 1.0 - max_distance,
            filters: filters.clone(),
        })
    }

    /// Flag ids whose cosine similarity to the centroid of all vectors falls
    /// below `threshold` — a cheap outlier heuristic, not a clustering
    /// algorithm.
    pub fn find_outliers(&self, threshold: f32) -> Result<Vec<String>> {
        let ids = self.store.all_ids()?;
        let records: Vec<Record> = ids.iter().filter_map(|id| self.store.get(id).ok()).collect();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let dim = records[0].vector.len();
        let mut centroid = vec![0.0_f32; dim];
        let mut n = 0;
        for r in &records {
            if r.vector.len() == dim {
                for (c, x) in centroid.iter_mut().zip(r.vector.iter()) {
                    *c += x;
                }
                n += 1;
            }
        }
        if n == 0 {
            return Ok(Vec::new());
        }
        for c in centroid.iter_mut() {
            *c /= n as f32;
        }
        Ok(records
            .into_iter()
            .filter(|r| r.vector.len() == dim && vecmath::cosine(&r.vector, &centroid) < threshold)
            .map(|r| r.id)
            .collect())
    }

    pub fn validate(&self) -> Result<ValidationReport> {
        let ids = self.store.all_ids()?;
        let total = ids.len();
        let mut invalid_ids = Vec::new();
        for id in &ids {
            match self.store.get(id) {
                Ok(rec) if vecmath::is_valid(&rec.vector) => {}
                _ => invalid_ids.push(id.clone()),
            }
        }
        let valid = total - invalid_ids.len();
        let integrity = if total == 0 { 1.0 } else { valid as f32 / total as f32 };
        Ok(ValidationReport {
            total,
            valid,
            invalid_ids,
            integrity,
        })
    }

    /// Full rebuild of the LSH index and metadata index from the store.
    /// Takes the exclusive write lock for the whole operation.
    pub fn rebuild_indexes(&self) -> Result<()> {
        let ids = self.store.all_ids()?;
        let records: Vec<Record> = ids.iter().filter_map(|id| self.store.get(id).ok()).collect();
        let mut idx = self.indexes.write().unwrap();
        idx.meta = MetadataIndex::new();
        idx.meta.declare_field("channel", crate::metaindex::FieldKind::Exact);
        idx.meta.declare_field("user_id", crate::metaindex::FieldKind::Exact);
        idx.meta.declare_field("thread_id", crate::metaindex::FieldKind::Exact);
        idx.meta.declare_field("privacy_level", crate::metaindex::FieldKind::Exact);
        idx.meta.declare_field("embedding_method", crate::metaindex::FieldKind::Exact);
        idx.meta.declare_field("timestamp", crate::metaindex::FieldKind::Range);
        idx.meta.declare_field("text", crate::metaindex::FieldKind::Text);
        for r in &records {
            idx.meta.index_record(&r.id, &r.metadata);
        }
        if let Some(l) = idx.lsh.as_mut() {
            let dim = l.dimension();
            let entries: Vec<(String, Vec<f32>)> =
                records.into_iter().map(|r| (r.id, r.vector)).collect();
            l.rebuild(dim, &entries);
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<VectorDbStats> {
        let idx = self.indexes.read().unwrap();
        Ok(VectorDbStats {
            count: self.store.count()?,
            lsh_enabled: idx.lsh.is_some(),
            lsh_tables: idx.lsh.as_ref().map(|l| l.num_tables()).unwrap_or(0),
        })
    }
}
