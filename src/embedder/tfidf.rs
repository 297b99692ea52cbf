//! # TF-IDF embedder
//!
//! Vocabulary is fit from a corpus: tokens that appear in at least 2 documents
//! and at most 80% of documents. Transform produces
//! `token-frequency x log(N / document-frequency)`, L2-normalised into a
//! vector of length `max(|vocab|, 100)` (the fixed floor keeps downstream
//! cosine comparisons dimension-stable even for a tiny corpus).

use std::collections::HashMap;

use crate::text::tokenize;
use crate::vecmath;

#[derive(Debug, Clone)]
pub struct TfidfModel {
    vocab: HashMap<String, usize>,
    idf: Vec<f32>,
    dimension: usize,
}

impl TfidfModel {
    /// A model with an empty vocabulary, equivalent to "untrained".
    pub fn untrained() -> Self {
        Self {
            vocab: HashMap::new(),
            idf: Vec::new(),
            dimension: 100,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.vocab.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fit the vocabulary and IDF weights from a corpus of documents.
    pub fn fit(corpus: &[String]) -> Self {
        let n = corpus.len();
        if n == 0 {
            return Self::untrained();
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in corpus {
            let mut seen = std::collections::HashSet::new();
            for token in tokenize(doc) {
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token).or_insert(0) += 1;
                }
            }
        }

        let max_df = (0.8 * n as f64).floor() as usize;
        let mut vocab = HashMap::new();
        let mut idf = Vec::new();
        let mut terms: Vec<(&String, &usize)> = doc_freq.iter().collect();
        terms.sort_by(|a, b| a.0.cmp(b.0)); // deterministic vocabulary ordering

        for (term, &df) in terms {
            if df >= 2 && df <= max_df.max(2) {
                vocab.insert(term.clone(), vocab.len());
                idf.push(((n as f32) / (df as f32)).ln());
            }
        }

        let dimension = vocab.len().max(100);
        Self {
            vocab,
            idf,
            dimension,
        }
    }

    /// Transform text into a TF-IDF vector. Returns the zero vector (length
    /// [`Self::dimension`]) when the vocabulary is empty or no token in the
    /// text is in-vocabulary.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimension];
        if self.vocab.is_empty() {
            return v;
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return v;
        }

        let mut tf: HashMap<usize, f32> = HashMap::new();
        for token in &tokens {
            if let Some(&idx) = self.vocab.get(token) {
                *tf.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        if tf.is_empty() {
            return v;
        }
        for (idx, freq) in tf {
            v[idx] = freq * self.idf[idx];
        }
        vecmath::normalise(&mut v);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "deploy tomorrow morning".to_string(),
            "deploy afternoon tests".to_string(),
            "tests passing deploy".to_string(),
        ]
    }

    #[test]
    fn untrained_model_yields_zero_vector() {
        let m = TfidfModel::untrained();
        let v = m.transform("deploy tomorrow");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), 100);
    }

    #[test]
    fn fit_then_transform_is_nonzero_for_known_terms() {
        let m = TfidfModel::fit(&corpus());
        let v = m.transform("deploy tests");
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[test]
    fn transform_of_only_stopwords_is_zero_vector() {
        let m = TfidfModel::fit(&corpus());
        let v = m.transform("the and but");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn dimension_is_floor_of_100() {
        let m = TfidfModel::fit(&["a b".to_string()]);
        assert_eq!(m.dimension(), 100);
    }
}
