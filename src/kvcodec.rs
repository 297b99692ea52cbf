//! # KV codec
//!
//! Serialisation for the two blob types the vector store persists per id:
//! embeddings and metadata. Both are encoded as plain text so the backing
//! store (`sled`, see [`crate::store`]) never needs to know the shape of what
//! it's holding.
//!
//! - Vectors serialise as comma-separated decimal numerals (`"0.1,0.2,-0.3"`).
//! - Metadata serialises as a restricted JSON object: only string, number, and
//!   boolean scalar values are permitted — arrays, nested objects, and null
//!   are rejected at encode time so the store never has to handle them on the
//!   way back out.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single metadata scalar. Deliberately narrower than `serde_json::Value`:
/// the wire format this module supports is string/number/bool only.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// A metadata record is an ordered map of field name to scalar value.
/// `BTreeMap` gives deterministic serialisation, which keeps round-trip tests
/// and golden fixtures stable.
pub type MetaRecord = BTreeMap<String, MetaValue>;

/// Serialise a vector as comma-separated decimals.
pub fn serialise_vector(v: &[f32]) -> String {
    v.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Deserialise a vector. An empty string yields `None` ("not found"); any
/// component that fails to parse as a float rejects the whole vector.
pub fn deserialise_vector(s: &str) -> Option<Vec<f32>> {
    if s.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(s.matches(',').count() + 1);
    for part in s.split(',') {
        match part.parse::<f32>() {
            Ok(x) => out.push(x),
            Err(_) => return None,
        }
    }
    Some(out)
}

/// Serialise a metadata record as a restricted JSON object.
pub fn serialise_metadata(m: &MetaRecord) -> String {
    let mut obj = Map::new();
    for (k, v) in m {
        let jv = match v {
            MetaValue::Str(s) => Value::String(s.clone()),
            MetaValue::Num(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            MetaValue::Bool(b) => Value::Bool(*b),
        };
        obj.insert(k.clone(), jv);
    }
    Value::Object(obj).to_string()
}

/// Deserialise a metadata record. An empty string yields `None`. Any value
/// that isn't a string, number, or boolean scalar is dropped silently rather
/// than rejecting the whole record — the wider store tolerates an ever-growing
/// set of opaque extras, and a single unsupported field shouldn't take the
/// record down with it.
pub fn deserialise_metadata(s: &str) -> Option<MetaRecord> {
    if s.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(s).ok()?;
    let obj = parsed.as_object()?;
    let mut out = MetaRecord::new();
    for (k, v) in obj {
        let mv = match v {
            Value::String(s) => MetaValue::Str(s.clone()),
            Value::Number(n) => MetaValue::Num(n.as_f64()?),
            Value::Bool(b) => MetaValue::Bool(*b),
            _ => continue,
        };
        out.insert(k.clone(), mv);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_round_trips() {
        let v = vec![0.1_f32, -2.5, 3.0];
        let s = serialise_vector(&v);
        let back = deserialise_vector(&s).unwrap();
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_vector_string_is_not_found() {
        assert_eq!(deserialise_vector(""), None);
    }

    #[test]
    fn malformed_numeric_rejects_whole_vector() {
        assert_eq!(deserialise_vector("1.0,not_a_number,3.0"), None);
    }

    #[test]
    fn metadata_round_trips() {
        let mut m = MetaRecord::new();
        m.insert("text".into(), MetaValue::Str("hello".into()));
        m.insert("timestamp".into(), MetaValue::Num(100.5));
        m.insert("is_bot".into(), MetaValue::Bool(false));
        let s = serialise_metadata(&m);
        let back = deserialise_metadata(&s).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn empty_metadata_string_is_not_found() {
        assert_eq!(deserialise_metadata(""), None);
    }
}
