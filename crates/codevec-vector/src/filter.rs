//! Metadata and document filters
//!
//! Filters are rendered to Chroma's `where` / `where_document` JSON, and
//! can also be evaluated locally by the in-memory store.

use codevec_core::{Metadata, MetadataValue};
use serde_json::{json, Value};

/// Conjunction of exact-match conditions on metadata fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition
    pub fn field_eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, MetadataValue)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Chroma `where` clause; `None` when there are no conditions.
    ///
    /// Chroma accepts exactly one top-level operator, so several
    /// conditions are wrapped in `$and`.
    pub fn to_where(&self) -> Option<Value> {
        let mut clauses: Vec<Value> = self
            .conditions
            .iter()
            .map(|(key, value)| json!({ key: { "$eq": Value::from(value.clone()) } }))
            .collect();

        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(json!({ "$and": clauses })),
        }
    }

    /// Whether `metadata` satisfies every condition
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            metadata
                .get(key)
                .is_some_and(|actual| values_equal(actual, expected))
        })
    }
}

impl<K, V> FromIterator<(K, V)> for MetadataFilter
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |filter, (key, value)| filter.field_eq(key, value))
    }
}

// Integers and floats compare numerically, as they do server side.
fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::Int(x), MetadataValue::Float(y))
        | (MetadataValue::Float(y), MetadataValue::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// Substring predicate on the raw document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    contains: String,
}

impl DocumentFilter {
    pub fn contains(text: impl Into<String>) -> Self {
        Self {
            contains: text.into(),
        }
    }

    /// Chroma `where_document` clause
    pub fn to_where_document(&self) -> Value {
        json!({ "$contains": self.contains })
    }

    pub fn matches(&self, document: &str) -> bool {
        document.contains(&self.contains)
    }
}
