//! # Shared tokenisation
//!
//! A single deterministic tokeniser shared by the metadata word index
//! ([`crate::metaindex`]) and the local embedder ([`crate::embedder`]): lowercase,
//! extract maximal runs of word characters of length >= 3, drop a fixed English
//! stopword list. Kept in one place so both consumers agree on what a "token" is.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was",
        "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now",
        "old", "see", "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she",
        "too", "use", "that", "with", "have", "this", "will", "your", "from", "they", "know",
        "want", "been", "good", "much", "some", "time", "very", "when", "come", "here", "just",
        "like", "long", "make", "many", "over", "such", "take", "than", "them", "well", "were",
        "what", "about", "after", "again", "could", "every", "first", "found", "great", "house",
        "large", "learn", "never", "other", "place", "right", "small", "sound", "still", "study",
        "their", "there", "these", "thing", "think", "three", "water", "where", "which", "world",
        "would", "write",
    ]
    .into_iter()
    .collect()
});

/// Tokenise `text`: lowercase, extract runs of ASCII letters of length >= 3,
/// drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_filters_short_tokens() {
        let toks = tokenize("The Quick BROWN fox jumps an ox");
        assert!(!toks.contains(&"the".to_string()));
        assert!(!toks.contains(&"an".to_string()));
        assert!(!toks.contains(&"ox".to_string()));
        assert!(toks.contains(&"quick".to_string()));
        assert!(toks.contains(&"brown".to_string()));
        assert!(toks.contains(&"jumps".to_string()));
    }

    #[test]
    fn tokenize_drops_stopwords() {
        let toks = tokenize("this and that were here");
        assert!(toks.is_empty());
    }

    #[test]
    fn tokenize_empty_text_yields_empty() {
        assert!(tokenize("").is_empty());
    }
}
