//! # Metadata index
//!
//! Inverted indexes over message metadata, supporting three field kinds:
//!
//! - `exact` — value -> id list, for equality filters.
//! - `range` — a sorted value list plus value -> id list, for `timestamp_after`
//!   / `timestamp_before` filters.
//! - `text`  — per-token id lists (tokenised with [`crate::text::tokenize`]),
//!   for `<field>_text` AND-of-tokens filters.
//!
//! `<field>_not` filters are recognised but never contribute to candidate
//! selection here — they're deferred and applied as a post-filter by the
//! vector DB facade once full records are in hand.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::kvcodec::{MetaRecord, MetaValue};
use crate::text::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Exact,
    Range,
    Text,
}

/// A single filter clause, parsed from a `<field>[_suffix] = value` pair.
#[derive(Debug, Clone)]
pub enum Filter {
    Exact { field: String, value: MetaValue },
    Not { field: String, value: MetaValue },
    TimestampAfter(f64),
    TimestampBefore(f64),
    Text { field: String, query: String },
}

fn meta_value_key(v: &MetaValue) -> String {
    match v {
        MetaValue::Str(s) => s.clone(),
        MetaValue::Num(n) => n.to_string(),
        MetaValue::Bool(b) => b.to_string(),
    }
}

#[derive(Default)]
pub struct MetadataIndex {
    schema: HashMap<String, FieldKind>,
    exact: HashMap<String, HashMap<String, Vec<String>>>,
    range_sorted: HashMap<String, BTreeMap<ordered_float::OrderedF64, Vec<String>>>,
    text: HashMap<String, HashMap<String, Vec<String>>>,
}

/// Minimal total-order wrapper over `f64` so it can key a `BTreeMap`. Metadata
/// timestamps are never NaN in practice (see [`crate::kvcodec`]'s scalar
/// restriction), so this never hits the NaN edge case `Ord` can't express.
mod ordered_float {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OrderedF64(pub f64);
    impl Eq for OrderedF64 {}
    impl PartialOrd for OrderedF64 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for OrderedF64 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}
use ordered_float::OrderedF64;

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field's indexed type. Re-declaring a field replaces its kind
    /// (existing index contents for a newly-declared field are only rebuilt
    /// via [`Self::reindex_all`]).
    pub fn declare_field(&mut self, field: &str, kind: FieldKind) {
        self.schema.insert(field.to_string(), kind);
    }

    fn add_exact(&mut self, field: &str, value: &MetaValue, id: &str) {
        let bucket = self
            .exact
            .entry(field.to_string())
            .or_default()
            .entry(meta_value_key(value))
            .or_default();
        if !bucket.iter().any(|x| x == id) {
            bucket.push(id.to_string());
        }
    }

    fn add_range(&mut self, field: &str, value: f64, id: &str) {
        let bucket = self
            .range_sorted
            .entry(field.to_string())
            .or_default()
            .entry(OrderedF64(value))
            .or_default();
        if !bucket.iter().any(|x| x == id) {
            bucket.push(id.to_string());
        }
    }

    fn add_text(&mut self, field: &str, text: &str, id: &str) {
        for token in tokenize(text) {
            let bucket = self
                .text
                .entry(field.to_string())
                .or_default()
                .entry(token)
                .or_default();
            if !bucket.iter().any(|x| x == id) {
                bucket.push(id.to_string());
            }
        }
    }

    /// Index a record's metadata according to the declared schema.
    pub fn index_record(&mut self, id: &str, metadata: &MetaRecord) {
        for (field, kind) in self.schema.clone() {
            let Some(value) = metadata.get(&field) else {
                continue;
            };
            match kind {
                FieldKind::Exact => self.add_exact(&field, value, id),
                FieldKind::Range => {
                    if let MetaValue::Num(n) = value {
                        self.add_range(&field, *n, id);
                    }
                }
                FieldKind::Text => {
                    if let MetaValue::Str(s) = value {
                        self.add_text(&field, s, id);
                    }
                }
            }
        }
    }

    /// Remove a record from every index bucket it appears in for this field
    /// set. Used on delete and as the first half of an update.
    pub fn remove_record(&mut self, id: &str, metadata: &MetaRecord) {
        for (field, kind) in self.schema.clone() {
            let Some(value) = metadata.get(&field) else {
                continue;
            };
            match kind {
                FieldKind::Exact => {
                    if let Some(m) = self.exact.get_mut(&field) {
                        if let Some(b) = m.get_mut(&meta_value_key(value)) {
                            b.retain(|x| x != id);
                        }
                    }
                }
                FieldKind::Range => {
                    if let MetaValue::Num(n) = value {
                        if let Some(m) = self.range_sorted.get_mut(&field) {
                            if let Some(b) = m.get_mut(&OrderedF64(*n)) {
                                b.retain(|x| x != id);
                            }
                        }
                    }
                }
                FieldKind::Text => {
                    if let MetaValue::Str(s) = value {
                        if let Some(m) = self.text.get_mut(&field) {
                            for token in tokenize(s) {
                                if let Some(b) = m.get_mut(&token) {
                                    b.retain(|x| x != id);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn exact_ids(&self, field: &str, value: &MetaValue) -> HashSet<String> {
        self.exact
            .get(field)
            .and_then(|m| m.get(&meta_value_key(value)))
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn timestamp_after_ids(&self, field: &str, t: f64) -> HashSet<String> {
        let Some(m) = self.range_sorted.get(field) else {
            return HashSet::new();
        };
        m.range((
            std::ops::Bound::Excluded(OrderedF64(t)),
            std::ops::Bound::Unbounded,
        ))
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect()
    }

    fn timestamp_before_ids(&self, field: &str, t: f64) -> HashSet<String> {
        let Some(m) = self.range_sorted.get(field) else {
            return HashSet::new();
        };
        m.range((
            std::ops::Bound::Unbounded,
            std::ops::Bound::Excluded(OrderedF64(t)),
        ))
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect()
    }

    fn text_ids(&self, field: &str, query: &str) -> HashSet<String> {
        let Some(m) = self.text.get(field) else {
            return HashSet::new();
        };
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return HashSet::new();
        }
        let mut sets = tokens.iter().map(|t| {
            m.get(t)
                .map(|v| v.iter().cloned().collect::<HashSet<_>>())
                .unwrap_or_default()
        });
        let first = sets.next().unwrap_or_default();
        sets.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
    }

    /// Intersect every *contributing* (non-deferred) filter's candidate set.
    /// Returns the full registry when no filter is recognised as
    /// contributing (this includes the case where only `_not` filters were
    /// supplied).
    pub fn filter_candidates(&self, filters: &[Filter], all_ids: &[String]) -> Vec<String> {
        let mut contributing: Option<HashSet<String>> = None;

        let mut intersect = |set: HashSet<String>, acc: &mut Option<HashSet<String>>| match acc
            .take()
        {
            Some(existing) => *acc = Some(existing.intersection(&set).cloned().collect()),
            None => *acc = Some(set),
        };

        for f in filters {
            match f {
                Filter::Exact { field, value } => {
                    intersect(self.exact_ids(field, value), &mut contributing)
                }
                Filter::TimestampAfter(t) => {
                    intersect(self.timestamp_after_ids("timestamp", *t), &mut contributing)
                }
                Filter::TimestampBefore(t) => {
                    intersect(
                        self.timestamp_before_ids("timestamp", *t),
                        &mut contributing,
                    )
                }
                Filter::Text { field, query } => {
                    intersect(self.text_ids(field, query), &mut contributing)
                }
                Filter::Not { .. } => {} // deferred, never contributes
            }
        }

        match contributing {
            Some(set) => all_ids.iter().filter(|id| set.contains(*id)).cloned().collect(),
            None => all_ids.to_vec(),
        }
    }

    /// Apply deferred `_not` filters as a post-filter over already-fetched
    /// `(id, metadata)` pairs.
    pub fn apply_not_filters<'a>(
        filters: &[Filter],
        records: impl Iterator<Item = (&'a str, &'a MetaRecord)>,
    ) -> Vec<&'a str> {
        let nots: Vec<(&str, &MetaValue)> = filters
            .iter()
            .filter_map(|f| match f {
                Filter::Not { field, value } => Some((field.as_str(), value)),
                _ => None,
            })
            .collect();
        records
            .filter(|(_, meta)| {
                nots.iter()
                    .all(|(field, value)| meta.get(*field) != Some(*value))
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Parse a single `key = value` pair (as used in the orchestrator's search
/// filter map) into a [`Filter`], recognising the suffix patterns from the
/// component design: `<field>`, `<field>_not`, `timestamp_after`,
/// `timestamp_before`, `<field>_text`.
pub fn parse_filter(key: &str, value: &MetaValue) -> Option<Filter> {
    if key == "timestamp_after" {
        return num(value).map(Filter::TimestampAfter);
    }
    if key == "timestamp_before" {
        return num(value).map(Filter::TimestampBefore);
    }
    if let Some(field) = key.strip_suffix("_not") {
        return Some(Filter::Not {
            field: field.to_string(),
            value: value.clone(),
        });
    }
    if let Some(field) = key.strip_suffix("_text") {
        if let MetaValue::Str(s) = value {
            return Some(Filter::Text {
                field: field.to_string(),
                query: s.clone(),
            });
        }
        return None;
    }
    Some(Filter::Exact {
        field: key.to_string(),
        value: value.clone(),
    })
}

fn num(v: &MetaValue) -> Option<f64> {
    match v {
        MetaValue::Num(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, MetaValue)]) -> MetaRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn exact_filter_finds_matching_id() {
        let mut idx = MetadataIndex::new();
        idx.declare_field("channel", FieldKind::Exact);
        idx.index_record("a", &rec(&[("channel", MetaValue::Str("C1".into()))]));
        idx.index_record("b", &rec(&[("channel", MetaValue::Str("C2".into()))]));
        let filters = vec![Filter::Exact {
            field: "channel".into(),
            value: MetaValue::Str("C1".into()),
        }];
        let ids = idx.filter_candidates(&filters, &["a".into(), "b".into()]);
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn timestamp_after_uses_range_index() {
        let mut idx = MetadataIndex::new();
        idx.declare_field("timestamp", FieldKind::Range);
        idx.index_record("old", &rec(&[("timestamp", MetaValue::Num(100.0))]));
        idx.index_record("new", &rec(&[("timestamp", MetaValue::Num(300.0))]));
        let filters = vec![Filter::TimestampAfter(200.0)];
        let ids = idx.filter_candidates(&filters, &["old".into(), "new".into()]);
        assert_eq!(ids, vec!["new".to_string()]);
    }

    #[test]
    fn text_filter_ands_tokens() {
        let mut idx = MetadataIndex::new();
        idx.declare_field("text", FieldKind::Text);
        idx.index_record("a", &rec(&[("text", MetaValue::Str("deploy tomorrow morning".into()))]));
        idx.index_record("b", &rec(&[("text", MetaValue::Str("deploy afternoon".into()))]));
        let filters = vec![Filter::Text {
            field: "text".into(),
            query: "deploy tomorrow".into(),
        }];
        let ids = idx.filter_candidates(&filters, &["a".into(), "b".into()]);
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn no_recognised_filter_returns_full_registry() {
        let idx = MetadataIndex::new();
        let filters = vec![Filter::Not {
            field: "channel".into(),
            value: MetaValue::Str("C1".into()),
        }];
        let all = vec!["a".to_string(), "b".to_string()];
        assert_eq!(idx.filter_candidates(&filters, &all), all);
    }

    #[test]
    fn not_filter_is_applied_as_post_filter() {
        let a_meta = rec(&[("channel", MetaValue::Str("C1".into()))]);
        let b_meta = rec(&[("channel", MetaValue::Str("C2".into()))]);
        let filters = vec![Filter::Not {
            field: "channel".into(),
            value: MetaValue::Str("C1".into()),
        }];
        let records = vec![("a", &a_meta), ("b", &b_meta)];
        let kept = MetadataIndex::apply_not_filters(&filters, records.into_iter());
        assert_eq!(kept, vec!["b"]);
    }

    #[test]
    fn parse_filter_recognises_suffixes() {
        assert!(matches!(
            parse_filter("timestamp_after", &MetaValue::Num(1.0)),
            Some(Filter::TimestampAfter(_))
        ));
        assert!(matches!(
            parse_filter("channel_not", &MetaValue::Str("x".into())),
            Some(Filter::Not { .. })
        ));
        assert!(matches!(
            parse_filter("text_text", &MetaValue::Str("q".into())),
            Some(Filter::Text { .. })
        ));
        assert!(matches!(
            parse_filter("channel", &MetaValue::Str("C1".into())),
            Some(Filter::Exact { .. })
        ));
    }
}
