//! # Locality-sensitive hashing index
//!
//! Random-hyperplane LSH over `N` independent tables, used by the vector DB
//! facade as a candidate-selection front end to an exact cosine scan (see
//! [`crate::vectordb`]).
//!
//! Per the design notes, hyperplane dimension is fixed at construction time:
//! inserting a vector of a different dimension is a hard error rather than a
//! silent per-hash regeneration, since the latter compromises the index for
//! every id already hashed with the old planes. Rebuilding (regenerating
//! hyperplanes and re-hashing everything) is only ever an explicit
//! administrative action via [`LshIndex::rebuild`].

use std::collections::HashMap;

use rand::Rng;
use thiserror::Error;

use crate::vecmath;

#[derive(Debug, Error, PartialEq)]
pub enum LshError {
    #[error("vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone)]
pub struct LshConfig {
    pub num_tables: usize,
    pub hyperplanes_per_table: usize,
    pub bucket_size_limit: usize,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            num_tables: 5,
            hyperplanes_per_table: 10,
            bucket_size_limit: 256,
        }
    }
}

struct Table {
    hyperplanes: Vec<Vec<f32>>,
    buckets: HashMap<String, Vec<String>>,
}

impl Table {
    fn new(dimension: usize, hyperplanes_per_table: usize, rng: &mut impl Rng) -> Self {
        let hyperplanes = (0..hyperplanes_per_table)
            .map(|_| random_unit_vector(dimension, rng))
            .collect();
        Self {
            hyperplanes,
            buckets: HashMap::new(),
        }
    }

    fn hash(&self, v: &[f32]) -> String {
        self.hyperplanes
            .iter()
            .map(|h| if vecmath::dot(v, h) >= 0.0 { '1' } else { '0' })
            .collect()
    }
}

fn random_unit_vector(dimension: usize, rng: &mut impl Rng) -> Vec<f32> {
    // Sum of 12 uniforms minus 6 approximates a standard normal (Irwin-Hall
    // trick); good enough for sampling a direction uniformly on the sphere.
    let mut v: Vec<f32> = (0..dimension)
        .map(|_| {
            let s: f32 = (0..12).map(|_| rng.gen::<f32>()).sum();
            s - 6.0
        })
        .collect();
    vecmath::normalise(&mut v);
    v
}

pub struct LshIndex {
    config: LshConfig,
    dimension: usize,
    tables: Vec<Table>,
    insertion_order: HashMap<String, usize>,
    next_order: usize,
}

/// A candidate returned by [`LshIndex::search`] before cosine re-ranking.
pub struct Candidate {
    pub id: String,
    pub collisions: usize,
}

impl LshIndex {
    pub fn new(dimension: usize, config: LshConfig) -> Self {
        let mut rng = rand::thread_rng();
        let tables = (0..config.num_tables)
            .map(|_| Table::new(dimension, config.hyperplanes_per_table, &mut rng))
            .collect();
        Self {
            config,
            dimension,
            tables,
            insertion_order: HashMap::new(),
            next_order: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, v: &[f32]) -> Result<(), LshError> {
        if v.len() != self.dimension {
            return Err(LshError::DimensionMismatch {
                expected: self.dimension,
                got: v.len(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, id: &str, v: &[f32]) -> Result<(), LshError> {
        self.check_dimension(v)?;
        if !self.insertion_order.contains_key(id) {
            self.insertion_order.insert(id.to_string(), self.next_order);
            self.next_order += 1;
        }
        for table in self.tables.iter_mut() {
            let key = table.hash(v);
            let bucket = table.buckets.entry(key).or_default();
            if !bucket.iter().any(|x| x == id) {
                bucket.push(id.to_string());
            }
        }
        Ok(())
    }

    /// Union candidate ids across all tables' matching buckets, ranked by the
    /// number of tables in which they collided (descending), ties broken by
    /// global insertion order.
    pub fn candidates(&self, v: &[f32]) -> Result<Vec<Candidate>, LshError> {
        self.check_dimension(v)?;
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut index_of: HashMap<&str, usize> = HashMap::new();

        for table in &self.tables {
            let key = table.hash(v);
            if let Some(bucket) = table.buckets.get(&key) {
                for id in bucket {
                    if let Some(&i) = index_of.get(id.as_str()) {
                        counts[i].1 += 1;
                    } else {
                        index_of.insert(id.as_str(), counts.len());
                        counts.push((id.clone(), 1));
                    }
                }
            }
        }

        let order = &self.insertion_order;
        counts.sort_by(|a, b| {
            b.1.cmp(&a.1).then_with(|| {
                let oa = order.get(&a.0).copied().unwrap_or(usize::MAX);
                let ob = order.get(&b.0).copied().unwrap_or(usize::MAX);
                oa.cmp(&ob)
            })
        });
        Ok(counts
            .into_iter()
            .map(|(id, collisions)| Candidate { id, collisions })
            .collect())
    }

    /// Clear every table, regenerate hyperplanes, and re-hash every entry in
    /// `entries`. An explicit administrative action, never triggered
    /// implicitly by a dimension mismatch.
    pub fn rebuild(&mut self, dimension: usize, entries: &[(String, Vec<f32>)]) {
        self.dimension = dimension;
        let mut rng = rand::thread_rng();
        self.tables = (0..self.config.num_tables)
            .map(|_| Table::new(dimension, self.config.hyperplanes_per_table, &mut rng))
            .collect();
        self.insertion_order.clear();
        self.next_order = 0;
        for (id, v) in entries {
            let _ = self.insert(id, v);
        }
    }

    pub fn bucket_size_limit(&self) -> usize {
        self.config.bucket_size_limit
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Remove an id from every bucket it appears in, across all tables.
    /// Best-effort: the id's hash isn't recomputed, every bucket is scanned.
    pub fn remove(&mut self, id: &str) {
        for table in self.tables.iter_mut() {
            for bucket in table.buckets.values_mut() {
                bucket.retain(|x| x != id);
            }
        }
        self.insertion_order.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_wrong_dimension() {
        let mut idx = LshIndex::new(4, LshConfig::default());
        assert_eq!(
            idx.insert("a", &[1.0, 2.0]),
            Err(LshError::DimensionMismatch {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn every_id_appears_in_exactly_one_bucket_per_table() {
        let mut idx = LshIndex::new(8, LshConfig::default());
        let v = vec![0.1, 0.2, -0.3, 0.4, 0.5, -0.1, 0.2, 0.3];
        idx.insert("a", &v).unwrap();
        for table in &idx.tables {
            let occurrences: usize = table
                .buckets
                .values()
                .map(|b| b.iter().filter(|x| *x == "a").count())
                .sum();
            assert_eq!(occurrences, 1);
        }
    }

    #[test]
    fn candidates_ranked_by_collision_count() {
        let mut idx = LshIndex::new(4, LshConfig {
            num_tables: 3,
            hyperplanes_per_table: 4,
            bucket_size_limit: 256,
        });
        let v = vec![1.0, 0.0, 0.0, 0.0];
        idx.insert("self", &v).unwrap();
        let candidates = idx.candidates(&v).unwrap();
        assert_eq!(candidates[0].id, "self");
        assert_eq!(candidates[0].collisions, 3);
    }

    #[test]
    fn rebuild_reassigns_new_dimension() {
        let mut idx = LshIndex::new(4, LshConfig::default());
        idx.rebuild(8, &[("a".to_string(), vec![0.0; 8])]);
        assert_eq!(idx.dimension(), 8);
        assert!(idx.insert("a", &vec![0.0; 8]).is_ok());
    }
}
