//! Core data models used throughout the pipeline.
//!
//! Rows from uploaded files carry arbitrary columns, so per-row values are
//! modelled as a closed [`MetadataValue`] variant inside an insertion-ordered
//! [`Metadata`] map. Numeric access always goes through explicit
//! coerce-or-default accessors.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Metadata keys written by the pipeline itself rather than by the upload.
pub const BOOKKEEPING_KEYS: [&str; 3] = ["file_id", "file_name", "row_index"];

/// A single scalar cell value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    /// Numeric view of the value; anything that is not a number becomes `0.0`.
    ///
    /// Text is trimmed and parsed, booleans map to `1.0`/`0.0`.
    pub fn as_f64_or_zero(&self) -> f64 {
        match self {
            MetadataValue::Number(n) if n.is_finite() => *n,
            MetadataValue::Number(_) => 0.0,
            MetadataValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            MetadataValue::Text(s) => parse_number(s).unwrap_or(0.0),
            MetadataValue::Null => 0.0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True for null and empty-string cells.
    pub fn is_blank(&self) -> bool {
        match self {
            MetadataValue::Null => true,
            MetadataValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// True when the value is a number or text that parses as one.
    pub fn looks_numeric(&self) -> bool {
        match self {
            MetadataValue::Number(_) => true,
            MetadataValue::Text(s) => parse_number(s).is_some(),
            _ => false,
        }
    }
}

/// Parse trimmed text as a number. Empty text and NaN are not numbers.
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| !n.is_nan())
}

fn integral(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Some(n as i64)
    } else {
        None
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Null => write!(f, "null"),
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => match integral(*n) {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{}", n),
            },
            MetadataValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetadataValue::Null => serializer.serialize_unit(),
            MetadataValue::Bool(b) => serializer.serialize_bool(*b),
            MetadataValue::Number(n) => match integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            MetadataValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Column name → value map that keeps column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Vec<(String, MetadataValue)>);

/// A raw row from an uploaded table.
pub type Row = Metadata;

impl Metadata {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the original position of existing keys.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Numeric value of `key`, `0.0` when missing or non-numeric.
    pub fn number_or_zero(&self, key: &str) -> f64 {
        self.get(key).map(|v| v.as_f64_or_zero()).unwrap_or(0.0)
    }

    /// All text-typed values, in column order.
    pub fn text_values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|(_, v)| v.as_str())
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = Metadata::new();
        for (k, v) in iter {
            meta.insert(k, v);
        }
        meta
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Metadata, A::Error> {
                let mut meta = Metadata::new();
                while let Some((k, v)) = access.next_entry::<String, MetadataValue>()? {
                    meta.insert(k, v);
                }
                Ok(meta)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

/// One embedded row of an uploaded file.
///
/// `id` is always `"{file_id}_{row_index}"`; every record in a table shares
/// the same vector dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub file_id: i64,
    pub row_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl DocumentRecord {
    pub fn record_id(file_id: i64, row_index: i64) -> String {
        format!("{}_{}", file_id, row_index)
    }
}

/// Which retrieval branch produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Vector,
    Fuzzy,
    Hybrid,
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchSource::Vector => "vector",
            SearchSource::Fuzzy => "fuzzy",
            SearchSource::Hybrid => "hybrid",
        })
    }
}

/// A retrieved row. `score` is distance-like: lower is more relevant.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub metadata: Metadata,
    pub source: SearchSource,
}

/// User-facing projection of a [`SearchResult`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub file_name: String,
    pub row_index: i64,
    pub text: String,
    /// Higher is better; see [`relevance_from_distance`].
    pub relevance_score: f64,
    pub metadata: Metadata,
}

/// The single conversion from the internal distance scale to relevance.
pub fn relevance_from_distance(distance: f64) -> f64 {
    1.0 - distance
}

impl From<SearchResult> for SourceDocument {
    fn from(result: SearchResult) -> Self {
        let file_name = result
            .metadata
            .get("file_name")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();
        let row_index = result.metadata.number_or_zero("row_index") as i64;
        SourceDocument {
            file_name,
            row_index,
            text: result.text,
            relevance_score: relevance_from_distance(result.score),
            metadata: result.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion_defaults_to_zero() {
        assert_eq!(MetadataValue::from("4500000").as_f64_or_zero(), 4_500_000.0);
        assert_eq!(MetadataValue::from(" 12.5 ").as_f64_or_zero(), 12.5);
        assert_eq!(MetadataValue::from("abc").as_f64_or_zero(), 0.0);
        assert_eq!(MetadataValue::from("").as_f64_or_zero(), 0.0);
        assert_eq!(MetadataValue::Null.as_f64_or_zero(), 0.0);
        assert_eq!(MetadataValue::Bool(true).as_f64_or_zero(), 1.0);
        assert_eq!(MetadataValue::from("NaN").as_f64_or_zero(), 0.0);
    }

    #[test]
    fn test_metadata_keeps_column_order() {
        let json = r#"{"nama_produk":"Laptop A","harga":7000000,"stok":3,"aktif":true,"catatan":null}"#;
        let meta: Metadata = serde_json::from_str(json).unwrap();
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["nama_produk", "harga", "stok", "aktif", "catatan"]);
        assert_eq!(meta.get("harga"), Some(&MetadataValue::Number(7_000_000.0)));
        assert_eq!(meta.get("catatan"), Some(&MetadataValue::Null));
        assert_eq!(serde_json::to_string(&meta).unwrap(), json);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut meta: Metadata = [("a", 1i64), ("b", 2i64)].into_iter().collect();
        meta.insert("a", 5i64);
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(meta.number_or_zero("a"), 5.0);
        assert_eq!(meta.number_or_zero("missing"), 0.0);
    }

    #[test]
    fn test_display_integral_numbers_without_fraction() {
        assert_eq!(MetadataValue::Number(7_000_000.0).to_string(), "7000000");
        assert_eq!(MetadataValue::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_source_document_inverts_score() {
        let mut metadata = Metadata::new();
        metadata.insert("file_id", 3i64);
        metadata.insert("file_name", "produk.xlsx");
        metadata.insert("row_index", 7i64);
        let result = SearchResult {
            id: "3_7".to_string(),
            text: "nama_produk: Laptop".to_string(),
            score: 0.25,
            metadata,
            source: SearchSource::Hybrid,
        };
        let doc = SourceDocument::from(result);
        assert_eq!(doc.file_name, "produk.xlsx");
        assert_eq!(doc.row_index, 7);
        assert!((doc.relevance_score - 0.75).abs() < 1e-12);
    }
}
