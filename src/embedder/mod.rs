//! # Local embedder (C7)
//!
//! Two deterministic, corpus-trained embedders — [`tfidf::TfidfModel`] and
//! [`wordvec::WordVecModel`] — exposed behind a single [`LocalEmbedder`] that
//! implements the routing fallback from the privacy router's "high" tier:
//! try TF-IDF first, and fall back to the averaged-word embedder when TF-IDF
//! produces the zero vector (untrained vocabulary, or a query made entirely
//! of stopwords/short tokens).

pub mod tfidf;
pub mod wordvec;

use tfidf::TfidfModel;
use wordvec::WordVecModel;

/// Which code path actually produced an embedding, echoed into message
/// metadata as `embedding_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMethod {
    TfidfLocal,
    SimpleLocal,
}

impl EmbedMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbedMethod::TfidfLocal => "tfidf_local",
            EmbedMethod::SimpleLocal => "simple_local",
        }
    }
}

pub struct LocalEmbedder {
    tfidf: TfidfModel,
    wordvec: WordVecModel,
}

impl LocalEmbedder {
    /// An untrained embedder: every transform falls straight through to
    /// `simple_local`'s zero-vector path until [`Self::fit`] is called.
    pub fn untrained() -> Self {
        Self {
            tfidf: TfidfModel::untrained(),
            wordvec: WordVecModel::untrained(wordvec::DEFAULT_DIMENSION),
        }
    }

    pub fn fit(corpus: &[String]) -> Self {
        Self {
            tfidf: TfidfModel::fit(corpus),
            wordvec: WordVecModel::fit(corpus, wordvec::DEFAULT_DIMENSION),
        }
    }

    /// Embed `text`, returning the vector and which path produced it.
    pub fn embed(&self, text: &str) -> (Vec<f32>, EmbedMethod) {
        if self.tfidf.is_trained() {
            let v = self.tfidf.transform(text);
            if v.iter().any(|x| *x != 0.0) {
                return (v, EmbedMethod::TfidfLocal);
            }
        }
        (self.wordvec.transform(text), EmbedMethod::SimpleLocal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "deploy tomorrow morning release".to_string(),
            "deploy afternoon tests release".to_string(),
            "tests passing deploy release".to_string(),
        ]
    }

    #[test]
    fn untrained_embedder_uses_simple_local() {
        let e = LocalEmbedder::untrained();
        let (_, method) = e.embed("deploy tomorrow");
        assert_eq!(method, EmbedMethod::SimpleLocal);
    }

    #[test]
    fn trained_embedder_prefers_tfidf() {
        let e = LocalEmbedder::fit(&corpus());
        let (_, method) = e.embed("deploy release");
        assert_eq!(method, EmbedMethod::TfidfLocal);
    }

    #[test]
    fn stopword_only_text_falls_back_to_simple_local() {
        let e = LocalEmbedder::fit(&corpus());
        let (_, method) = e.embed("the and but");
        assert_eq!(method, EmbedMethod::SimpleLocal);
    }
}
