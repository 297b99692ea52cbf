//! # Averaged word-vector embedder
//!
//! Vocabulary is fit from a corpus: tokens with overall corpus frequency >= 3.
//! Each vocabulary token is assigned a fixed random vector in `[-0.05, 0.05]^D`
//! (D defaults to 128) at fit time; the vectors don't change afterwards.
//! Transform averages the vectors of in-vocabulary tokens and L2-normalises.

use std::collections::HashMap;

use rand::Rng;

use crate::text::tokenize;
use crate::vecmath;

pub const DEFAULT_DIMENSION: usize = 128;

#[derive(Debug, Clone)]
pub struct WordVecModel {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl WordVecModel {
    pub fn untrained(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimension,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn fit(corpus: &[String], dimension: usize) -> Self {
        let mut freq: HashMap<String, usize> = HashMap::new();
        for doc in corpus {
            for token in tokenize(doc) {
                *freq.entry(token).or_insert(0) += 1;
            }
        }

        let mut rng = rand::thread_rng();
        let mut vectors = HashMap::new();
        let mut terms: Vec<&String> = freq
            .iter()
            .filter(|(_, &c)| c >= 3)
            .map(|(t, _)| t)
            .collect();
        terms.sort(); // deterministic assignment order

        for term in terms {
            let v: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-0.05..=0.05)).collect();
            vectors.insert(term.clone(), v);
        }

        Self { vectors, dimension }
    }

    /// Average the vectors of in-vocabulary tokens and L2-normalise. Returns
    /// the zero vector (length [`Self::dimension`]) when no token in `text`
    /// is in-vocabulary.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut sum = vec![0.0_f32; self.dimension];
        let mut n = 0;
        for token in tokenize(text) {
            if let Some(v) = self.vectors.get(&token) {
                for (s, x) in sum.iter_mut().zip(v.iter()) {
                    *s += x;
                }
                n += 1;
            }
        }
        if n == 0 {
            return sum;
        }
        for s in sum.iter_mut() {
            *s /= n as f32;
        }
        vecmath::normalise(&mut sum);
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "deploy deploy deploy tests tests".to_string(),
            "deploy release notes".to_string(),
        ]
    }

    #[test]
    fn infrequent_tokens_are_out_of_vocabulary() {
        let m = WordVecModel::fit(&corpus(), DEFAULT_DIMENSION);
        // "release" and "notes" each occur once, below the frequency-3 floor.
        let v = m.transform("release notes");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn frequent_token_produces_nonzero_vector() {
        let m = WordVecModel::fit(&corpus(), DEFAULT_DIMENSION);
        let v = m.transform("deploy");
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[test]
    fn transform_is_unit_norm_when_nonzero() {
        let m = WordVecModel::fit(&corpus(), DEFAULT_DIMENSION);
        let v = m.transform("deploy");
        let mag = vecmath::magnitude(&v);
        assert!((mag - 1.0).abs() < 1e-5);
    }
}
